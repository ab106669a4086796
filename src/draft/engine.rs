// Pick commit engine: the sole writer of draft session state.
//
// Sessions live in an explicit session-keyed store (no process-wide
// singletons). Every state change happens inside one critical section and is
// guarded by the optimistic version check: exactly one caller succeeds per
// version value, everyone else gets `StaleTurn` and must reload. The version
// check is the only concurrency-control mechanism -- there is no queueing and
// no waiting, every operation is a single synchronous validate-and-apply.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::eligibility;
use super::sequencer;
use super::session::{DraftConfiguration, DraftSession, Selection, SessionStatus};
use super::standings::{self, ScoringRules, StandingEntry};
use super::timer::{self, TimerState};
use super::DraftError;
use crate::catalog::Catalog;

/// Capacity of the event broadcast channel. Slow subscribers past this lag
/// are dropped by tokio's broadcast semantics, not by the engine.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything the engine tracks for one draft instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub config: DraftConfiguration,
    pub session: DraftSession,
    /// Append-only log, totally ordered by `overall_pick_number`.
    pub selections: Vec<Selection>,
}

/// Successful commit: the appended selection plus the advanced session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub selection: Selection,
    pub session: DraftSession,
}

/// Events emitted on the commit path, consumed by notification delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DraftEvent {
    PickCommitted {
        session_id: String,
        overall_pick_number: u32,
        picker_id: String,
        item_id: String,
        was_auto_selected: bool,
    },
    SessionCompleted { session_id: String },
}

/// The draft turn engine. One instance serves any number of independent
/// sessions, each addressable by id.
pub struct DraftEngine {
    catalog: Catalog,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    events: broadcast::Sender<DraftEvent>,
}

impl DraftEngine {
    pub fn new(catalog: Catalog) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        DraftEngine {
            catalog,
            sessions: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DraftEvent> {
        self.events.subscribe()
    }

    /// Acquire the session store.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.lock().expect("session store mutex poisoned")
    }

    fn emit(&self, event: DraftEvent) {
        // No subscribers is fine; the send result only reports that.
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Register a new pending session with a frozen configuration.
    pub fn create_session(
        &self,
        session_id: &str,
        config: DraftConfiguration,
    ) -> Result<DraftSession, DraftError> {
        config.validate()?;
        self.validate_pool(&config)?;

        let mut sessions = self.sessions();
        if sessions.contains_key(session_id) {
            return Err(DraftError::AlreadyStarted);
        }
        let session = DraftSession::new_pending(session_id);
        sessions.insert(
            session_id.to_string(),
            SessionRecord {
                config,
                session: session.clone(),
                selections: Vec::new(),
            },
        );
        info!("Created session {session_id}");
        Ok(session)
    }

    /// Reinstall a previously persisted record (crash recovery). Replaces any
    /// in-memory state for the same id.
    pub fn restore_session(&self, record: SessionRecord) -> Result<(), DraftError> {
        record.config.validate()?;
        let id = record.session.session_id.clone();
        self.sessions().insert(id.clone(), record);
        info!("Restored session {id}");
        Ok(())
    }

    /// Mark a pending session as scheduled (start time managed out of band).
    pub fn schedule_session(&self, session_id: &str) -> Result<DraftSession, DraftError> {
        let mut sessions = self.sessions();
        let record = get_record(&mut sessions, session_id)?;
        if record.session.status != SessionStatus::Pending {
            return Err(DraftError::AlreadyStarted);
        }
        record.session.status = SessionStatus::Scheduled;
        record.session.version += 1;
        Ok(record.session.clone())
    }

    /// Open the session for picks: first turn goes on the clock.
    /// Commissioner-only at the surface layer.
    pub fn start_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DraftSession, DraftError> {
        let mut sessions = self.sessions();
        let record = get_record(&mut sessions, session_id)?;
        match record.session.status {
            SessionStatus::Pending | SessionStatus::Scheduled => {}
            _ => return Err(DraftError::AlreadyStarted),
        }

        let first_picker = sequencer::picker_for(&record.config, 1)?;
        record.session.status = SessionStatus::InProgress;
        record.session.current_overall_pick = 1;
        record.session.current_picker_id = Some(first_picker);
        record.session.turn_started_at = record.config.is_timed().then_some(now);
        record.session.version += 1;
        info!(
            "Session {session_id} started: {} picks over {} rounds",
            record.config.total_picks(),
            record.config.rounds_total
        );
        Ok(record.session.clone())
    }

    /// Pause an in-progress session. The turn clock is cleared and reissued
    /// fresh on resume.
    pub fn pause_session(&self, session_id: &str) -> Result<DraftSession, DraftError> {
        let mut sessions = self.sessions();
        let record = get_record(&mut sessions, session_id)?;
        if record.session.status != SessionStatus::InProgress {
            return Err(DraftError::SessionNotActive {
                status: record.session.status,
            });
        }
        record.session.status = SessionStatus::Paused;
        record.session.turn_started_at = None;
        record.session.version += 1;
        Ok(record.session.clone())
    }

    pub fn resume_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DraftSession, DraftError> {
        let mut sessions = self.sessions();
        let record = get_record(&mut sessions, session_id)?;
        if record.session.status != SessionStatus::Paused {
            return Err(DraftError::SessionNotActive {
                status: record.session.status,
            });
        }
        record.session.status = SessionStatus::InProgress;
        record.session.turn_started_at = record.config.is_timed().then_some(now);
        record.session.version += 1;
        Ok(record.session.clone())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_session(&self, session_id: &str) -> Result<DraftSession, DraftError> {
        let mut sessions = self.sessions();
        Ok(get_record(&mut sessions, session_id)?.session.clone())
    }

    pub fn get_config(&self, session_id: &str) -> Result<DraftConfiguration, DraftError> {
        let mut sessions = self.sessions();
        Ok(get_record(&mut sessions, session_id)?.config.clone())
    }

    /// The full append-only selection log, ordered by overall pick number.
    pub fn selections(&self, session_id: &str) -> Result<Vec<Selection>, DraftError> {
        let mut sessions = self.sessions();
        Ok(get_record(&mut sessions, session_id)?.selections.clone())
    }

    /// The current turn's clock, derived from the server-issued turn start.
    pub fn timer_state(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TimerState, DraftError> {
        let mut sessions = self.sessions();
        let record = get_record(&mut sessions, session_id)?;
        Ok(timer::state(
            &record.session,
            record.config.turn_budget_seconds,
            now,
        ))
    }

    /// Items the current picker may select right now. Empty when the session
    /// is not in progress.
    pub fn selectable_items(
        &self,
        session_id: &str,
    ) -> Result<std::collections::BTreeSet<String>, DraftError> {
        let mut sessions = self.sessions();
        let record = get_record(&mut sessions, session_id)?;
        if record.session.status != SessionStatus::InProgress {
            return Ok(Default::default());
        }
        let slot = sequencer::slot_for(&record.config, record.session.current_overall_pick)?;
        Ok(eligibility::selectable_items(
            &record.config.eligibility,
            &self.catalog,
            &slot.picker_id,
            slot.round,
            &record.selections,
        ))
    }

    /// Ranked standings recomputed from the selection log.
    pub fn standings(
        &self,
        session_id: &str,
        rules: &ScoringRules,
    ) -> Result<Vec<StandingEntry>, DraftError> {
        let mut sessions = self.sessions();
        let record = get_record(&mut sessions, session_id)?;
        Ok(standings::compute(
            &record.config.order,
            &record.selections,
            &self.catalog,
            rules,
        ))
    }

    // ------------------------------------------------------------------
    // Commit path
    // ------------------------------------------------------------------

    /// Validate and apply a proposed selection as one atomic unit.
    ///
    /// Rejections never mutate state; the caller either gets the appended
    /// selection plus the advanced session, or a typed error saying why and
    /// whether to retry.
    pub fn commit(
        &self,
        session_id: &str,
        proposed_by: &str,
        item_id: &str,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<CommitResult, DraftError> {
        let result = {
            let mut sessions = self.sessions();
            let record = get_record(&mut sessions, session_id)?;
            commit_inner(
                &self.catalog,
                record,
                proposed_by,
                item_id,
                expected_version,
                now,
                false,
            )?
        };
        self.publish_commit(session_id, &result);
        Ok(result)
    }

    /// The timer-expiry path: force `proposed_by` to the on-clock participant
    /// and select the fallback item (highest catalog value, ties to the
    /// lowest item id). Passes through the exact same validation as `commit`,
    /// so an auto-pick can never violate eligibility or turn invariants, and
    /// racing expiry observers are serialized by the same version check.
    pub fn auto_pick(
        &self,
        session_id: &str,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<CommitResult, DraftError> {
        let result = {
            let mut sessions = self.sessions();
            let record = get_record(&mut sessions, session_id)?;

            if record.session.status != SessionStatus::InProgress {
                return Err(DraftError::SessionNotActive {
                    status: record.session.status,
                });
            }
            // Version first: a racing observer of an already-advanced turn
            // should see StaleTurn, not a misleading timer error.
            if expected_version != record.session.version {
                return Err(DraftError::StaleTurn {
                    expected: expected_version,
                    actual: record.session.version,
                });
            }
            let timer_state = timer::state(
                &record.session,
                record.config.turn_budget_seconds,
                now,
            );
            if timer_state != TimerState::Expired {
                return Err(DraftError::TurnNotExpired { state: timer_state });
            }

            let slot = sequencer::slot_for(&record.config, record.session.current_overall_pick)?;
            let pool = eligibility::selectable_items(
                &record.config.eligibility,
                &self.catalog,
                &slot.picker_id,
                slot.round,
                &record.selections,
            );
            let item_id = pool
                .iter()
                .max_by(|a, b| {
                    let va = self.catalog.item(a).map_or(0.0, |item| item.value);
                    let vb = self.catalog.item(b).map_or(0.0, |item| item.value);
                    // Highest value wins; equal values fall to the lower id.
                    va.total_cmp(&vb).then_with(|| b.cmp(a))
                })
                .cloned()
                .ok_or_else(|| DraftError::InvalidConfig {
                    message: "no eligible items remain for auto-selection".to_string(),
                })?;

            debug!(
                "Auto-selecting {item_id} for {} on pick {}",
                slot.picker_id, record.session.current_overall_pick
            );
            commit_inner(
                &self.catalog,
                record,
                &slot.picker_id.clone(),
                &item_id,
                expected_version,
                now,
                true,
            )?
        };
        self.publish_commit(session_id, &result);
        Ok(result)
    }

    fn publish_commit(&self, session_id: &str, result: &CommitResult) {
        self.emit(DraftEvent::PickCommitted {
            session_id: session_id.to_string(),
            overall_pick_number: result.selection.overall_pick_number,
            picker_id: result.selection.picker_id.clone(),
            item_id: result.selection.item_id.clone(),
            was_auto_selected: result.selection.was_auto_selected,
        });
        if result.session.status == SessionStatus::Completed {
            info!("Session {session_id} completed");
            self.emit(DraftEvent::SessionCompleted {
                session_id: session_id.to_string(),
            });
        }
    }

    /// Reject configurations the catalog cannot cover end to end. This keeps
    /// the auto-selection fallback total: every turn is guaranteed at least
    /// one eligible item, so the selection log stays gap-free.
    fn validate_pool(&self, config: &DraftConfiguration) -> Result<(), DraftError> {
        let total = config.total_picks();
        match &config.eligibility {
            eligibility::EligibilityMode::OpenPool { allow_shared_items } => {
                if !allow_shared_items && (self.catalog.len() as u32) < total {
                    return Err(DraftError::InvalidConfig {
                        message: format!(
                            "catalog has {} items but the draft needs {total}",
                            self.catalog.len()
                        ),
                    });
                }
            }
            eligibility::EligibilityMode::CategoryConstrained {
                allow_duplicate_categories,
                unique_across_participants,
                ..
            } => {
                let categories = self.catalog.categories();
                if categories.is_empty() {
                    return Err(DraftError::InvalidConfig {
                        message: "category-constrained draft needs a categorized catalog"
                            .to_string(),
                    });
                }
                if !allow_duplicate_categories
                    && config.rounds_total as usize > categories.len()
                {
                    return Err(DraftError::InvalidConfig {
                        message: format!(
                            "{} rounds but only {} categories",
                            config.rounds_total,
                            categories.len()
                        ),
                    });
                }
                if *unique_across_participants {
                    for category in categories {
                        if self.catalog.category_size(category)
                            < config.order.len()
                        {
                            return Err(DraftError::InvalidConfig {
                                message: format!(
                                    "category `{category}` has fewer items than participants"
                                ),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn get_record<'a>(
    sessions: &'a mut HashMap<String, SessionRecord>,
    session_id: &str,
) -> Result<&'a mut SessionRecord, DraftError> {
    sessions
        .get_mut(session_id)
        .ok_or_else(|| DraftError::UnknownSession {
            session_id: session_id.to_string(),
        })
}

/// The six validation/apply steps of a commit, run under the store lock.
fn commit_inner(
    catalog: &Catalog,
    record: &mut SessionRecord,
    proposed_by: &str,
    item_id: &str,
    expected_version: u64,
    now: DateTime<Utc>,
    was_auto_selected: bool,
) -> Result<CommitResult, DraftError> {
    // 1. Session must be accepting picks.
    if record.session.status != SessionStatus::InProgress {
        return Err(DraftError::SessionNotActive {
            status: record.session.status,
        });
    }

    // 2. Optimistic version check: the caller must have seen current state.
    if expected_version != record.session.version {
        return Err(DraftError::StaleTurn {
            expected: expected_version,
            actual: record.session.version,
        });
    }

    // 3. Turn ownership, re-derived from the sequencer. OutOfRange here means
    //    the session's own pick counter is corrupt -- not a caller mistake.
    let slot = sequencer::slot_for(&record.config, record.session.current_overall_pick)?;
    if proposed_by != slot.picker_id {
        return Err(DraftError::NotYourTurn {
            proposed_by: proposed_by.to_string(),
            on_clock: slot.picker_id,
        });
    }

    // 4. Eligibility.
    eligibility::check_item(
        &record.config.eligibility,
        catalog,
        proposed_by,
        slot.round,
        &record.selections,
        item_id,
    )
    .map_err(|reason| DraftError::NotEligible {
        item_id: item_id.to_string(),
        reason,
    })?;

    // 5. Append the selection at the current pick number.
    let selection = Selection {
        overall_pick_number: record.session.current_overall_pick,
        round_number: slot.round,
        position_in_round: slot.position_in_round,
        picker_id: slot.picker_id,
        item_id: item_id.to_string(),
        committed_at: now,
        was_auto_selected,
    };
    record.selections.push(selection.clone());

    // 6. Advance or complete, then bump the version.
    let next_pick = record.session.current_overall_pick + 1;
    if next_pick > record.config.total_picks() {
        record.session.status = SessionStatus::Completed;
        record.session.current_overall_pick = next_pick;
        record.session.current_picker_id = None;
        record.session.turn_started_at = None;
    } else {
        record.session.current_overall_pick = next_pick;
        record.session.current_picker_id = Some(sequencer::picker_for(&record.config, next_pick)?);
        record.session.turn_started_at = record.config.is_timed().then_some(now);
    }
    record.session.version += 1;

    Ok(CommitResult {
        selection,
        session: record.session.clone(),
    })
}
