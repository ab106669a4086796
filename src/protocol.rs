// JSON message protocol between WebSocket clients and the draft engine.

use serde::{Deserialize, Serialize};

use crate::draft::engine::DraftEvent;
use crate::draft::session::{DraftSession, Selection};
use crate::draft::standings::StandingEntry;
use crate::draft::{DraftError, IneligibleReason};

// ---------------------------------------------------------------------------
// Client -> server requests
// ---------------------------------------------------------------------------

/// Requests a client can send. The `type` field selects the variant; field
/// names are snake_case throughout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Open the session for picks. Commissioner action.
    StartSession { session_id: String },
    /// Fetch the current session state and turn clock.
    GetSession { session_id: String },
    /// Propose a selection for the current turn.
    Commit {
        session_id: String,
        participant_id: String,
        item_id: String,
        /// The session version the client last observed.
        expected_version: u64,
    },
    /// Force the fallback selection for an expired turn.
    AutoPick {
        session_id: String,
        expected_version: u64,
    },
    /// Fetch ranked standings.
    Standings { session_id: String },
    /// Suspend the turn clock. Commissioner action.
    PauseSession { session_id: String },
    /// Resume a paused session with a fresh turn clock. Commissioner action.
    ResumeSession { session_id: String },
}

// ---------------------------------------------------------------------------
// Server -> client messages
// ---------------------------------------------------------------------------

/// Machine-readable rejection codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    UnknownSession,
    SessionNotActive,
    AlreadyStarted,
    StaleTurn,
    NotYourTurn,
    NotEligible,
    TurnNotExpired,
    InvalidConfig,
    Internal,
}

/// Messages the server sends, both as direct responses and as broadcast
/// notifications on the commit path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current session state plus the derived turn countdown.
    Session {
        session: DraftSession,
        /// Seconds left on the current turn; `None` when untimed or no turn
        /// is on the clock.
        remaining_seconds: Option<u64>,
    },
    /// A commit was accepted.
    Committed {
        selection: Selection,
        session: DraftSession,
    },
    Standings { entries: Vec<StandingEntry> },
    /// A request was rejected.
    Error {
        code: ErrorCode,
        message: String,
        /// Whether reloading state and retrying can succeed.
        retryable: bool,
        /// Present only for `NotEligible` rejections.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<IneligibleReason>,
    },
    /// Broadcast: a pick was committed (by anyone, including auto-selection).
    PickCommitted {
        session_id: String,
        overall_pick_number: u32,
        picker_id: String,
        item_id: String,
        was_auto_selected: bool,
    },
    /// Broadcast: the final pick landed.
    SessionCompleted { session_id: String },
}

impl ServerMessage {
    /// Map an engine rejection onto the wire error shape. `retryable` is true
    /// only for races the client can win by reloading: a stale version, or a
    /// timer observed as unexpired by a lagging auto-pick caller.
    pub fn from_error(err: &DraftError) -> Self {
        let (code, retryable, reason) = match err {
            DraftError::UnknownSession { .. } => (ErrorCode::UnknownSession, false, None),
            DraftError::SessionNotActive { .. } => (ErrorCode::SessionNotActive, false, None),
            DraftError::AlreadyStarted => (ErrorCode::AlreadyStarted, false, None),
            DraftError::StaleTurn { .. } => (ErrorCode::StaleTurn, true, None),
            DraftError::NotYourTurn { .. } => (ErrorCode::NotYourTurn, false, None),
            DraftError::NotEligible { reason, .. } => {
                (ErrorCode::NotEligible, false, Some(*reason))
            }
            DraftError::TurnNotExpired { .. } => (ErrorCode::TurnNotExpired, true, None),
            DraftError::InvalidConfig { .. } => (ErrorCode::InvalidConfig, false, None),
            DraftError::OutOfRange { .. } => (ErrorCode::Internal, false, None),
        };
        ServerMessage::Error {
            code,
            message: err.to_string(),
            retryable,
            reason,
        }
    }

    /// A malformed or unparseable request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: ErrorCode::BadRequest,
            message: message.into(),
            retryable: false,
            reason: None,
        }
    }

    /// An infrastructure failure unrelated to the request's content.
    pub fn internal(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: ErrorCode::Internal,
            message: message.into(),
            retryable: false,
            reason: None,
        }
    }
}

impl From<DraftEvent> for ServerMessage {
    fn from(event: DraftEvent) -> Self {
        match event {
            DraftEvent::PickCommitted {
                session_id,
                overall_pick_number,
                picker_id,
                item_id,
                was_auto_selected,
            } => ServerMessage::PickCommitted {
                session_id,
                overall_pick_number,
                picker_id,
                item_id,
                was_auto_selected,
            },
            DraftEvent::SessionCompleted { session_id } => {
                ServerMessage::SessionCompleted { session_id }
            }
        }
    }
}
