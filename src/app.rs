// Application state and orchestration logic.
//
// The central event loop that coordinates WebSocket client requests, the
// engine's broadcast events, and the periodic turn-expiry check. The engine
// owns all draft semantics; this layer parses requests, persists accepted
// state transitions, and pushes notifications to the connected client.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::draft::engine::{CommitResult, DraftEngine, SessionRecord};
use crate::draft::sequencer;
use crate::draft::session::{DraftSession, SessionStatus};
use crate::draft::timer::TimerState;
use crate::draft::DraftError;
use crate::protocol::{ClientRequest, ServerMessage};
use crate::ws_server::WsEvent;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How often the main loop checks the configured session for an expired turn.
pub const TURN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// The complete application state.
pub struct AppState {
    pub config: Config,
    /// Arc so tests can drive the same engine from multiple handles.
    pub engine: Arc<DraftEngine>,
    pub db: Database,
    /// The session this process serves, from configuration.
    pub session_id: String,
    /// Outbound sender for the currently connected client, if any.
    pub client: Option<mpsc::Sender<String>>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<DraftEngine>, db: Database) -> Self {
        let session_id = config.session_id.clone();
        AppState {
            config,
            engine,
            db,
            session_id,
            client: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

/// Restore the configured session from the database, or create it fresh.
///
/// Returns `true` when a persisted session was restored. The restored record
/// is cross-checked: the picker derived from the selection count must agree
/// with the stored turn pointer, otherwise the session row and the selection
/// log drifted apart (a crash between the two writes) and we log it loudly.
pub fn recover_from_db(state: &mut AppState) -> anyhow::Result<bool> {
    if let Some((config, session)) = state.db.load_session(&state.session_id)? {
        let selections = state.db.load_selections(&state.session_id)?;
        info!(
            "Recovering session {}: {} selections, status {}",
            state.session_id,
            selections.len(),
            session.status
        );

        let next_pick = selections.len() as u32 + 1;
        if session.status == SessionStatus::InProgress {
            if session.current_overall_pick != next_pick {
                warn!(
                    "Session {} turn pointer ({}) disagrees with selection log ({} rows)",
                    state.session_id,
                    session.current_overall_pick,
                    selections.len()
                );
            }
            match sequencer::picker_for(&config, next_pick) {
                Ok(derived) => {
                    if session.current_picker_id.as_deref() != Some(derived.as_str()) {
                        warn!(
                            "Session {} stored picker {:?} differs from derived {derived}",
                            state.session_id, session.current_picker_id
                        );
                    }
                }
                Err(e) => warn!("Could not derive picker during recovery check: {e}"),
            }
        }

        state.engine.restore_session(SessionRecord {
            config,
            session,
            selections,
        })?;
        return Ok(true);
    }

    info!(
        "No persisted session {}, creating from configuration",
        state.session_id
    );
    let session = state
        .engine
        .create_session(&state.session_id, state.config.draft.clone())?;
    state.db.insert_session(&state.config.draft, &session)?;
    state.db.set_active_session_id(&state.session_id)?;
    Ok(false)
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

/// Parse and execute one raw client request, returning the direct response.
///
/// Accepted state transitions are persisted before the response is produced,
/// so a crash after this function returns cannot lose an acknowledged pick.
pub fn handle_request(state: &AppState, raw: &str) -> ServerMessage {
    let request: ClientRequest = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(e) => {
            warn!("Failed to parse client request: {e}");
            return ServerMessage::bad_request(format!("unparseable request: {e}"));
        }
    };

    let now = Utc::now();
    match request {
        ClientRequest::StartSession { session_id } => {
            match state.engine.start_session(&session_id, now) {
                Ok(session) => persist_and_report(state, session),
                Err(e) => ServerMessage::from_error(&e),
            }
        }
        ClientRequest::GetSession { session_id } => {
            let session = match state.engine.get_session(&session_id) {
                Ok(s) => s,
                Err(e) => return ServerMessage::from_error(&e),
            };
            let remaining = match state.engine.timer_state(&session_id, now) {
                Ok(TimerState::Running { remaining_seconds }) => Some(remaining_seconds),
                Ok(TimerState::Expired) => Some(0),
                Ok(TimerState::Idle) => None,
                Err(e) => return ServerMessage::from_error(&e),
            };
            ServerMessage::Session {
                session,
                remaining_seconds: remaining,
            }
        }
        ClientRequest::Commit {
            session_id,
            participant_id,
            item_id,
            expected_version,
        } => {
            match state
                .engine
                .commit(&session_id, &participant_id, &item_id, expected_version, now)
            {
                Ok(result) => {
                    persist_commit(state, &session_id, &result);
                    ServerMessage::Committed {
                        selection: result.selection,
                        session: result.session,
                    }
                }
                Err(e) => ServerMessage::from_error(&e),
            }
        }
        ClientRequest::AutoPick {
            session_id,
            expected_version,
        } => match state.engine.auto_pick(&session_id, expected_version, now) {
            Ok(result) => {
                persist_commit(state, &session_id, &result);
                ServerMessage::Committed {
                    selection: result.selection,
                    session: result.session,
                }
            }
            Err(e) => ServerMessage::from_error(&e),
        },
        ClientRequest::Standings { session_id } => {
            match state.engine.standings(&session_id, &state.config.scoring) {
                Ok(entries) => ServerMessage::Standings { entries },
                Err(e) => ServerMessage::from_error(&e),
            }
        }
        ClientRequest::PauseSession { session_id } => {
            match state.engine.pause_session(&session_id) {
                Ok(session) => persist_and_report(state, session),
                Err(e) => ServerMessage::from_error(&e),
            }
        }
        ClientRequest::ResumeSession { session_id } => {
            match state.engine.resume_session(&session_id, now) {
                Ok(session) => persist_and_report(state, session),
                Err(e) => ServerMessage::from_error(&e),
            }
        }
    }
}

/// Persist a lifecycle transition and report the new session state.
fn persist_and_report(state: &AppState, session: DraftSession) -> ServerMessage {
    persist_session(state, &session);
    ServerMessage::Session {
        session,
        remaining_seconds: None,
    }
}

/// Persist an accepted commit: the selection row first (idempotent), then the
/// advanced session guarded by the version it replaced.
fn persist_commit(state: &AppState, session_id: &str, result: &CommitResult) {
    if let Err(e) = state.db.record_selection(session_id, &result.selection) {
        warn!("Failed to persist selection to DB: {e}");
    }
    persist_session(state, &result.session);
}

fn persist_session(state: &AppState, session: &DraftSession) {
    // The engine bumped the version as part of the transition; the stored row
    // must still be at the previous one.
    let expected = session.version.saturating_sub(1);
    match state.db.update_session_checked(session, expected) {
        Ok(true) => {}
        Ok(false) => warn!(
            "Session {} row was not at version {expected}; persisted state may lag",
            session.session_id
        ),
        Err(e) => warn!("Failed to persist session to DB: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Turn expiry
// ---------------------------------------------------------------------------

/// Fire the fallback selection if the configured session's turn has expired.
/// Losing the version race to a client's own commit is expected and quiet.
fn maybe_auto_pick(state: &AppState) {
    let now = Utc::now();
    let expired = matches!(
        state.engine.timer_state(&state.session_id, now),
        Ok(TimerState::Expired)
    );
    if !expired {
        return;
    }

    let version = match state.engine.get_session(&state.session_id) {
        Ok(session) => session.version,
        Err(_) => return,
    };

    match state.engine.auto_pick(&state.session_id, version, now) {
        Ok(result) => {
            info!(
                "Turn expired: auto-selected {} for {} (pick {})",
                result.selection.item_id,
                result.selection.picker_id,
                result.selection.overall_pick_number
            );
            persist_commit(state, &state.session_id, &result);
        }
        Err(DraftError::StaleTurn { .. }) | Err(DraftError::TurnNotExpired { .. }) => {
            // A commit landed between our observation and the attempt.
            debug!("Auto-pick lost the turn race, nothing to do");
        }
        Err(e) => warn!("Auto-pick failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the main application event loop.
///
/// Listens with `tokio::select!` on:
/// 1. WebSocket events from the server task
/// 2. The engine's broadcast event stream, forwarded to the client
/// 3. A one-second interval that drives the turn-expiry fallback
pub async fn run(mut ws_rx: mpsc::Receiver<WsEvent>, mut state: AppState) -> anyhow::Result<()> {
    info!("Application event loop started");

    let mut events = state.engine.subscribe();
    let mut turn_interval = tokio::time::interval(TURN_CHECK_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // check happens after one full interval.
    turn_interval.tick().await;

    loop {
        tokio::select! {
            // --- WebSocket events ---
            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(WsEvent::Connected { addr, outbound }) => {
                        info!("Client connected from {addr}");
                        state.client = Some(outbound);
                    }
                    Some(WsEvent::Disconnected) => {
                        info!("Client disconnected");
                        state.client = None;
                    }
                    Some(WsEvent::Request(raw)) => {
                        let response = handle_request(&state, &raw);
                        send_to_client(&state, &response).await;
                    }
                    None => {
                        info!("WebSocket channel closed, shutting down");
                        break;
                    }
                }
            }

            // --- Engine broadcast events ---
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let message = ServerMessage::from(event);
                        send_to_client(&state, &message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event stream lagged, {skipped} notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Engine event stream closed, shutting down");
                        break;
                    }
                }
            }

            // --- Turn expiry check ---
            _ = turn_interval.tick() => {
                maybe_auto_pick(&state);
            }
        }
    }

    info!("Application event loop exiting");
    Ok(())
}

/// Serialize and send a message to the connected client, if any.
async fn send_to_client(state: &AppState, message: &ServerMessage) {
    let Some(client) = &state.client else {
        return;
    };
    match serde_json::to_string(message) {
        Ok(json) => {
            if client.send(json).await.is_err() {
                debug!("Client outbound channel closed");
            }
        }
        Err(e) => warn!("Failed to serialize server message: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
