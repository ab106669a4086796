// Draft session data model: configuration, session record, committed selections.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::eligibility::EligibilityMode;
use super::DraftError;

/// How the pick order moves between rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// The same order every round.
    Fixed,
    /// The order reverses every round (snake draft).
    Serpentine,
}

/// Immutable draft configuration, frozen once the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftConfiguration {
    /// Participant identities in first-round pick order.
    pub order: Vec<String>,
    pub discipline: Discipline,
    /// Selections each participant makes over the whole draft.
    pub rounds_total: u32,
    /// Per-turn time budget in seconds. 0 means untimed.
    pub turn_budget_seconds: u32,
    pub eligibility: EligibilityMode,
}

impl DraftConfiguration {
    pub fn participant_count(&self) -> u32 {
        self.order.len() as u32
    }

    /// Total number of picks in the draft (`order.len() * rounds_total`).
    pub fn total_picks(&self) -> u32 {
        self.participant_count() * self.rounds_total
    }

    pub fn is_timed(&self) -> bool {
        self.turn_budget_seconds > 0
    }

    /// Check the structural invariants: a non-empty order with no duplicate
    /// identities, and at least one round.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.order.is_empty() {
            return Err(DraftError::InvalidConfig {
                message: "participant order is empty".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for id in &self.order {
            if !seen.insert(id.as_str()) {
                return Err(DraftError::InvalidConfig {
                    message: format!("duplicate participant in order: {id}"),
                });
            }
        }
        if self.rounds_total == 0 {
            return Err(DraftError::InvalidConfig {
                message: "rounds_total must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Lifecycle states of a draft session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Scheduled,
    InProgress,
    Paused,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// The mutable session record. Owned and mutated exclusively by the engine;
/// everything handed to callers is a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSession {
    pub session_id: String,
    pub status: SessionStatus,
    /// 1-indexed monotonic pick counter. Strictly increases by exactly 1 per
    /// accepted commit; `status == Completed` iff it exceeds `total_picks()`.
    pub current_overall_pick: u32,
    /// Derived from the sequencer; `None` once the draft completes.
    pub current_picker_id: Option<String>,
    /// Server-issued start time of the current turn. `None` when untimed,
    /// paused, or completed.
    pub turn_started_at: Option<DateTime<Utc>>,
    /// Monotonic counter for optimistic-concurrency commit checks.
    pub version: u64,
}

impl DraftSession {
    /// A fresh session awaiting `start_session`.
    pub fn new_pending(session_id: &str) -> Self {
        DraftSession {
            session_id: session_id.to_string(),
            status: SessionStatus::Pending,
            current_overall_pick: 1,
            current_picker_id: None,
            turn_started_at: None,
            version: 0,
        }
    }
}

/// One committed turn. Append-only: once accepted, a selection is permanent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub overall_pick_number: u32,
    pub round_number: u32,
    pub position_in_round: u32,
    pub picker_id: String,
    pub item_id: String,
    pub committed_at: DateTime<Utc>,
    pub was_auto_selected: bool,
}
