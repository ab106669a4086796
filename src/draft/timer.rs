// Turn timer: pure function of (now, turn start, budget).
//
// No background ticking lives here -- any ticking is a presentation (or app
// loop) concern. All observers converge on the same countdown because the
// math uses only the server-issued turn start, never a client clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{DraftSession, SessionStatus};

/// Observable state of the current turn's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimerState {
    /// No clock: untimed draft, or no turn is active.
    Idle,
    /// Turn is active with time left on the clock.
    Running { remaining_seconds: u64 },
    /// The budget is spent; the auto-selection path may fire.
    Expired,
}

/// Seconds left on a turn that started at `turn_started_at` with the given
/// budget: `max(0, budget - (now - turn_started_at))`.
pub fn remaining_seconds(
    now: DateTime<Utc>,
    turn_started_at: DateTime<Utc>,
    budget_seconds: u32,
) -> u64 {
    // A turn start in the future (clock skew between writers) counts as no
    // time elapsed rather than extra time.
    let elapsed = (now - turn_started_at).num_seconds().max(0) as u64;
    u64::from(budget_seconds).saturating_sub(elapsed)
}

/// Derive the timer state for a session. Read-only and safe to call from any
/// number of concurrent observers.
pub fn state(session: &DraftSession, budget_seconds: u32, now: DateTime<Utc>) -> TimerState {
    if budget_seconds == 0 || session.status != SessionStatus::InProgress {
        return TimerState::Idle;
    }
    match session.turn_started_at {
        None => TimerState::Idle,
        Some(started_at) => {
            let remaining = remaining_seconds(now, started_at, budget_seconds);
            if remaining == 0 {
                TimerState::Expired
            } else {
                TimerState::Running {
                    remaining_seconds: remaining,
                }
            }
        }
    }
}
