// Integration tests for the draft engine.
//
// These tests exercise the full system end-to-end using the library crate's
// public API. They verify that the major subsystems (turn sequencing,
// eligibility, commit concurrency, the turn timer, persistence with crash
// recovery, and the JSON request protocol) work together correctly.

use std::sync::Arc;

use draft_engine::app::{self, AppState};
use draft_engine::catalog::{Catalog, CatalogItem};
use draft_engine::config::Config;
use draft_engine::db::Database;
use draft_engine::draft::eligibility::EligibilityMode;
use draft_engine::draft::engine::DraftEngine;
use draft_engine::draft::session::{Discipline, DraftConfiguration, SessionStatus};
use draft_engine::draft::standings::{ScoringMode, ScoringRules, TiebreakMetric};
use draft_engine::draft::timer::TimerState;
use draft_engine::draft::DraftError;
use draft_engine::protocol::{ErrorCode, ServerMessage};

use chrono::{Duration, Utc};
use std::collections::BTreeSet;

// ===========================================================================
// Test helpers
// ===========================================================================

const SESSION: &str = "it-session";

/// Flat catalog of ten uncategorized items, values 1.0 through 10.0.
fn flat_catalog() -> Catalog {
    let items = (1..=10)
        .map(|i| CatalogItem {
            item_id: format!("m{i:02}"),
            name: format!("Item {i}"),
            category: None,
            value: i as f64,
        })
        .collect();
    Catalog::new(items).unwrap()
}

/// Categorized catalog: three categories with three items each.
fn categorized_catalog() -> Catalog {
    let mut items = Vec::new();
    for (ci, cat) in ["picture", "director", "actor"].iter().enumerate() {
        for i in 1..=3 {
            items.push(CatalogItem {
                item_id: format!("{cat}-{i}"),
                name: format!("{cat} nominee {i}"),
                category: Some(cat.to_string()),
                value: (10 * (ci + 1) + i) as f64,
            });
        }
    }
    Catalog::new(items).unwrap()
}

fn open_pool_config(participants: &[&str], rounds: u32, budget: u32) -> DraftConfiguration {
    DraftConfiguration {
        order: participants.iter().map(|p| p.to_string()).collect(),
        discipline: Discipline::Serpentine,
        rounds_total: rounds,
        turn_budget_seconds: budget,
        eligibility: EligibilityMode::OpenPool {
            allow_shared_items: false,
        },
    }
}

fn item_value_rules() -> ScoringRules {
    ScoringRules {
        mode: ScoringMode::ItemValue,
        tiebreak: TiebreakMetric::ItemsHeld,
        correct_items: BTreeSet::new(),
    }
}

fn app_config(draft: DraftConfiguration) -> Config {
    Config {
        session_id: SESSION.to_string(),
        draft,
        scoring: item_value_rules(),
        catalog_path: "unused".to_string(),
        ws_port: 0,
        db_path: ":memory:".to_string(),
    }
}

// ===========================================================================
// End-to-end serpentine draft
// ===========================================================================

#[test]
fn serpentine_draft_runs_to_completion() {
    let engine = DraftEngine::new(flat_catalog());
    let config = open_pool_config(&["alice", "bob", "carol"], 2, 0);
    engine.create_session(SESSION, config).unwrap();
    engine.start_session(SESSION, Utc::now()).unwrap();

    // Round 1 forward, round 2 reversed.
    let expected_order = ["alice", "bob", "carol", "carol", "bob", "alice"];
    let picks = ["m01", "m02", "m03", "m04", "m05", "m06"];

    for (i, item) in picks.iter().enumerate() {
        let session = engine.get_session(SESSION).unwrap();
        let picker = session.current_picker_id.clone().unwrap();
        assert_eq!(picker, expected_order[i]);

        let result = engine
            .commit(SESSION, &picker, item, session.version, Utc::now())
            .unwrap();
        assert_eq!(result.selection.overall_pick_number as usize, i + 1);
        assert_eq!(result.selection.picker_id, picker);
    }

    let session = engine.get_session(SESSION).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.current_picker_id.is_none());

    // The selection log is a contiguous 1..=6 sequence.
    let selections = engine.selections(SESSION).unwrap();
    let numbers: Vec<u32> = selections.iter().map(|s| s.overall_pick_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);

    // Further commits are rejected without touching state.
    let err = engine
        .commit(SESSION, "alice", "m07", session.version, Utc::now())
        .unwrap_err();
    assert!(matches!(err, DraftError::SessionNotActive { .. }));

    // carol holds m03 (3.0) and m04 (4.0) and leads the standings.
    let standings = engine.standings(SESSION, &item_value_rules()).unwrap();
    assert_eq!(standings[0].participant_id, "carol");
    assert_eq!(standings[0].primary_score, 7.0);
    assert_eq!(standings[0].rank, 1);
}

#[test]
fn round_locked_draft_walks_categories_in_order() {
    let engine = DraftEngine::new(categorized_catalog());
    let config = DraftConfiguration {
        order: vec!["alice".to_string(), "bob".to_string()],
        discipline: Discipline::Fixed,
        rounds_total: 3,
        turn_budget_seconds: 0,
        eligibility: EligibilityMode::CategoryConstrained {
            allow_duplicate_categories: false,
            unique_across_participants: true,
            round_locked: true,
        },
    };
    engine.create_session(SESSION, config).unwrap();
    engine.start_session(SESSION, Utc::now()).unwrap();

    // Round 1 is locked to the first declared category.
    let session = engine.get_session(SESSION).unwrap();
    let err = engine
        .commit(SESSION, "alice", "director-1", session.version, Utc::now())
        .unwrap_err();
    assert!(matches!(err, DraftError::NotEligible { .. }));

    // Walk all three rounds in category order; items are unique per
    // participant pair because unique_across_participants is on.
    let picks = [
        ("alice", "picture-1"),
        ("bob", "picture-2"),
        ("alice", "director-1"),
        ("bob", "director-2"),
        ("alice", "actor-1"),
        ("bob", "actor-2"),
    ];
    for (picker, item) in picks {
        let session = engine.get_session(SESSION).unwrap();
        assert_eq!(session.current_picker_id.as_deref(), Some(picker));
        engine
            .commit(SESSION, picker, item, session.version, Utc::now())
            .unwrap();
    }

    assert_eq!(
        engine.get_session(SESSION).unwrap().status,
        SessionStatus::Completed
    );
}

// ===========================================================================
// Commit concurrency
// ===========================================================================

#[test]
fn concurrent_commits_for_the_same_turn_admit_exactly_one() {
    let engine = Arc::new(DraftEngine::new(flat_catalog()));
    let config = open_pool_config(&["alice", "bob"], 1, 0);
    engine.create_session(SESSION, config).unwrap();
    engine.start_session(SESSION, Utc::now()).unwrap();

    let version = engine.get_session(SESSION).unwrap().version;

    // Two writers race the same observed version with different items.
    let handles: Vec<_> = ["m01", "m02"]
        .into_iter()
        .map(|item| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                engine.commit(SESSION, "alice", item, version, Utc::now())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);

    let loss = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loss.as_ref().unwrap_err(),
        DraftError::StaleTurn { .. }
    ));

    // Exactly one selection landed and the turn advanced once.
    let session = engine.get_session(SESSION).unwrap();
    assert_eq!(session.current_overall_pick, 2);
    assert_eq!(engine.selections(SESSION).unwrap().len(), 1);
}

// ===========================================================================
// Turn timer and auto-pick
// ===========================================================================

#[test]
fn expired_turn_auto_picks_highest_value_item() {
    let engine = DraftEngine::new(flat_catalog());
    let config = open_pool_config(&["alice", "bob"], 1, 30);
    engine.create_session(SESSION, config).unwrap();

    let t0 = Utc::now();
    engine.start_session(SESSION, t0).unwrap();

    // Before the budget elapses the timer runs and auto-pick is refused.
    let mid = t0 + Duration::seconds(10);
    assert_eq!(
        engine.timer_state(SESSION, mid).unwrap(),
        TimerState::Running {
            remaining_seconds: 20
        }
    );
    let version = engine.get_session(SESSION).unwrap().version;
    assert!(matches!(
        engine.auto_pick(SESSION, version, mid).unwrap_err(),
        DraftError::TurnNotExpired { .. }
    ));

    // After expiry the fallback takes the highest-value item, and the turn
    // advances with a fresh clock rather than being skipped.
    let late = t0 + Duration::seconds(31);
    assert_eq!(engine.timer_state(SESSION, late).unwrap(), TimerState::Expired);
    let result = engine.auto_pick(SESSION, version, late).unwrap();
    assert_eq!(result.selection.item_id, "m10");
    assert!(result.selection.was_auto_selected);
    assert_eq!(result.session.current_picker_id.as_deref(), Some("bob"));
    assert_eq!(result.session.turn_started_at, Some(late));

    // A second expiry observer with the old version is told to reload.
    assert!(matches!(
        engine.auto_pick(SESSION, version, late).unwrap_err(),
        DraftError::StaleTurn { .. }
    ));
}

#[test]
fn pause_freezes_the_clock_and_resume_restarts_it() {
    let engine = DraftEngine::new(flat_catalog());
    let config = open_pool_config(&["alice", "bob"], 1, 30);
    engine.create_session(SESSION, config).unwrap();

    let t0 = Utc::now();
    engine.start_session(SESSION, t0).unwrap();
    engine.pause_session(SESSION).unwrap();

    // Long after the original budget, the paused session shows no clock and
    // rejects commits.
    let late = t0 + Duration::seconds(300);
    assert_eq!(engine.timer_state(SESSION, late).unwrap(), TimerState::Idle);
    let version = engine.get_session(SESSION).unwrap().version;
    assert!(matches!(
        engine
            .commit(SESSION, "alice", "m01", version, late)
            .unwrap_err(),
        DraftError::SessionNotActive { .. }
    ));

    // Resuming hands the same turn a full budget.
    let session = engine.resume_session(SESSION, late).unwrap();
    assert_eq!(session.current_picker_id.as_deref(), Some("alice"));
    assert_eq!(
        engine.timer_state(SESSION, late).unwrap(),
        TimerState::Running {
            remaining_seconds: 30
        }
    );
}

// ===========================================================================
// Persistence and crash recovery
// ===========================================================================

#[test]
fn draft_survives_a_restart_mid_session() {
    let config = app_config(open_pool_config(&["alice", "bob"], 2, 0));

    // First process: create, start, and commit two picks through the
    // request path so both the engine and the database see them.
    let engine = Arc::new(DraftEngine::new(flat_catalog()));
    let db = Database::open(":memory:").unwrap();
    let mut state = AppState::new(config, engine, db);
    assert!(!app::recover_from_db(&mut state).unwrap());

    let start = format!(r#"{{"type":"start_session","session_id":"{SESSION}"}}"#);
    let ServerMessage::Session { session, .. } = app::handle_request(&state, &start) else {
        panic!("start failed");
    };

    for (picker, item) in [("alice", "m03"), ("bob", "m07")] {
        let session = state.engine.get_session(SESSION).unwrap();
        let raw = format!(
            r#"{{"type":"commit","session_id":"{SESSION}","participant_id":"{picker}","item_id":"{item}","expected_version":{}}}"#,
            session.version
        );
        assert!(matches!(
            app::handle_request(&state, &raw),
            ServerMessage::Committed { .. }
        ));
    }
    drop(session);

    // Second process: fresh engine over the same database.
    let engine2 = Arc::new(DraftEngine::new(flat_catalog()));
    let AppState { config, db, .. } = state;
    let mut state2 = AppState::new(config, engine2, db);
    assert!(app::recover_from_db(&mut state2).unwrap());

    let session = state2.engine.get_session(SESSION).unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.current_overall_pick, 3);
    // Round 2 of a serpentine order: bob picks again.
    assert_eq!(session.current_picker_id.as_deref(), Some("bob"));

    // The owned-item constraint survived the restart.
    let raw = format!(
        r#"{{"type":"commit","session_id":"{SESSION}","participant_id":"bob","item_id":"m07","expected_version":{}}}"#,
        session.version
    );
    match app::handle_request(&state2, &raw) {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::NotEligible),
        other => panic!("expected Error, got {other:?}"),
    }

    // Finish the draft and confirm standings see all four picks.
    for (picker, item) in [("bob", "m08"), ("alice", "m09")] {
        let session = state2.engine.get_session(SESSION).unwrap();
        let raw = format!(
            r#"{{"type":"commit","session_id":"{SESSION}","participant_id":"{picker}","item_id":"{item}","expected_version":{}}}"#,
            session.version
        );
        assert!(matches!(
            app::handle_request(&state2, &raw),
            ServerMessage::Committed { .. }
        ));
    }

    let raw = format!(r#"{{"type":"standings","session_id":"{SESSION}"}}"#);
    match app::handle_request(&state2, &raw) {
        ServerMessage::Standings { entries } => {
            assert_eq!(entries.len(), 2);
            // alice: 3.0 + 9.0; bob: 7.0 + 8.0.
            assert_eq!(entries[0].participant_id, "bob");
            assert_eq!(entries[0].primary_score, 15.0);
            assert_eq!(entries[1].participant_id, "alice");
            assert_eq!(entries[1].primary_score, 12.0);
        }
        other => panic!("expected Standings, got {other:?}"),
    }
    assert_eq!(state2.db.selection_count(SESSION).unwrap(), 4);
}

// ===========================================================================
// Broadcast notifications
// ===========================================================================

#[test]
fn completion_is_announced_on_the_event_stream() {
    let engine = DraftEngine::new(flat_catalog());
    let mut events = engine.subscribe();
    let config = open_pool_config(&["alice"], 1, 0);
    engine.create_session(SESSION, config).unwrap();
    engine.start_session(SESSION, Utc::now()).unwrap();

    let version = engine.get_session(SESSION).unwrap().version;
    engine
        .commit(SESSION, "alice", "m01", version, Utc::now())
        .unwrap();

    let first: ServerMessage = events.try_recv().unwrap().into();
    assert!(matches!(first, ServerMessage::PickCommitted { .. }));
    let second: ServerMessage = events.try_recv().unwrap().into();
    assert!(matches!(second, ServerMessage::SessionCompleted { .. }));
}
