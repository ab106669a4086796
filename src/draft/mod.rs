// Draft turn engine: sequencing, eligibility, commit, timing, standings.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod eligibility;
pub mod engine;
pub mod sequencer;
pub mod session;
pub mod standings;
pub mod timer;

use session::SessionStatus;
use timer::TimerState;

/// Why a proposed item was rejected by the eligibility policy.
///
/// The engine's accept/reject decision is the same for every variant; the
/// sub-reason exists so callers can surface a specific message to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    /// The item id is not in the catalog (or has no category in a
    /// category-constrained draft).
    UnknownItem,
    /// The item was already selected and shared ownership is not allowed.
    AlreadyOwned,
    /// The participant already holds an item in this item's category.
    CategoryFilled,
    /// The item's category is not the active category for the current round.
    WrongCategoryForRound,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IneligibleReason::UnknownItem => "unknown item",
            IneligibleReason::AlreadyOwned => "already owned",
            IneligibleReason::CategoryFilled => "category already filled",
            IneligibleReason::WrongCategoryForRound => "wrong category for this round",
        };
        write!(f, "{s}")
    }
}

/// Every way an engine operation can fail.
///
/// All failures are returned as values; nothing here unwinds past the engine
/// boundary. `OutOfRange` is the one variant that indicates a broken internal
/// invariant rather than a recoverable caller mistake.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DraftError {
    #[error("pick {pick} out of range (valid 1..={max})")]
    OutOfRange { pick: u32, max: u32 },

    #[error("unknown session: {session_id}")]
    UnknownSession { session_id: String },

    #[error("session is {status}, not accepting picks")]
    SessionNotActive { status: SessionStatus },

    #[error("session already started")]
    AlreadyStarted,

    #[error("stale turn: caller saw version {expected}, session is at {actual}")]
    StaleTurn { expected: u64, actual: u64 },

    #[error("not your turn: {proposed_by} proposed but {on_clock} is on the clock")]
    NotYourTurn {
        proposed_by: String,
        on_clock: String,
    },

    #[error("item `{item_id}` is not eligible: {reason}")]
    NotEligible {
        item_id: String,
        reason: IneligibleReason,
    },

    #[error("turn timer has not expired ({state:?})")]
    TurnNotExpired { state: TimerState },

    #[error("invalid draft configuration: {message}")]
    InvalidConfig { message: String },
}
