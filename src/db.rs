// SQLite persistence layer for draft state.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::draft::session::{DraftConfiguration, DraftSession, Selection, SessionStatus};

/// SQLite-backed persistence for sessions, committed selections, and
/// key-value engine state.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                session_id           TEXT PRIMARY KEY,
                config               TEXT NOT NULL,
                status               TEXT NOT NULL,
                current_overall_pick INTEGER NOT NULL,
                current_picker_id    TEXT,
                turn_started_at      TEXT,
                version              INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS selections (
                session_id          TEXT NOT NULL REFERENCES sessions(session_id),
                overall_pick_number INTEGER NOT NULL,
                round_number        INTEGER NOT NULL,
                position_in_round   INTEGER NOT NULL,
                picker_id           TEXT NOT NULL,
                item_id             TEXT NOT NULL,
                committed_at        TEXT NOT NULL,
                was_auto_selected   INTEGER NOT NULL,
                PRIMARY KEY (session_id, overall_pick_number)
            );

            CREATE TABLE IF NOT EXISTS engine_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Insert a new session row with its frozen configuration. Fails if a row
    /// with the same session id already exists.
    pub fn insert_session(
        &self,
        config: &DraftConfiguration,
        session: &DraftSession,
    ) -> Result<()> {
        let conn = self.conn();
        let config_json =
            serde_json::to_string(config).context("failed to serialize draft configuration")?;
        conn.execute(
            "INSERT INTO sessions
                (session_id, config, status, current_overall_pick, current_picker_id, turn_started_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.session_id,
                config_json,
                session.status.to_string(),
                session.current_overall_pick,
                session.current_picker_id,
                session.turn_started_at.map(|t| t.to_rfc3339()),
                session.version as i64,
            ],
        )
        .context("failed to insert session")?;
        Ok(())
    }

    /// Persist the session's current state, but only if the stored row is
    /// still at `expected_version`. Returns `false` when the conditional
    /// update matched no row, meaning another writer got there first.
    pub fn update_session_checked(
        &self,
        session: &DraftSession,
        expected_version: u64,
    ) -> Result<bool> {
        let conn = self.conn();
        let updated = conn
            .execute(
                "UPDATE sessions SET
                    status = ?1,
                    current_overall_pick = ?2,
                    current_picker_id = ?3,
                    turn_started_at = ?4,
                    version = ?5
                 WHERE session_id = ?6 AND version = ?7",
                params![
                    session.status.to_string(),
                    session.current_overall_pick,
                    session.current_picker_id,
                    session.turn_started_at.map(|t| t.to_rfc3339()),
                    session.version as i64,
                    session.session_id,
                    expected_version as i64,
                ],
            )
            .context("failed to update session")?;
        Ok(updated == 1)
    }

    /// Load a session and its configuration. Returns `None` if no row exists
    /// for the given id.
    pub fn load_session(
        &self,
        session_id: &str,
    ) -> Result<Option<(DraftConfiguration, DraftSession)>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT config, status, current_overall_pick, current_picker_id, turn_started_at, version
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .context("failed to query session")?;

        let Some((config_json, status, current_overall_pick, current_picker_id, started, version)) =
            row
        else {
            return Ok(None);
        };

        let config: DraftConfiguration = serde_json::from_str(&config_json)
            .context("failed to deserialize draft configuration")?;
        let session = DraftSession {
            session_id: session_id.to_string(),
            status: parse_status(&status)?,
            current_overall_pick,
            current_picker_id,
            turn_started_at: started.as_deref().map(parse_timestamp).transpose()?,
            version: version as u64,
        };
        Ok(Some((config, session)))
    }

    // ------------------------------------------------------------------
    // Selections
    // ------------------------------------------------------------------

    /// Record a committed selection. Uses INSERT OR IGNORE for idempotency:
    /// re-recording the same (session, pick number) is a no-op, so replaying
    /// a commit after a crash cannot duplicate rows.
    pub fn record_selection(&self, session_id: &str, selection: &Selection) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO selections
                (session_id, overall_pick_number, round_number, position_in_round, picker_id, item_id, committed_at, was_auto_selected)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                selection.overall_pick_number,
                selection.round_number,
                selection.position_in_round,
                selection.picker_id,
                selection.item_id,
                selection.committed_at.to_rfc3339(),
                selection.was_auto_selected,
            ],
        )
        .context("failed to record selection")?;
        Ok(())
    }

    /// Load all selections for a session, ordered by overall pick number.
    pub fn load_selections(&self, session_id: &str) -> Result<Vec<Selection>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT overall_pick_number, round_number, position_in_round, picker_id, item_id, committed_at, was_auto_selected
                 FROM selections WHERE session_id = ?1 ORDER BY overall_pick_number",
            )
            .context("failed to prepare load_selections query")?;

        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })
            .context("failed to query selections")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map selection rows")?;

        let mut selections = Vec::with_capacity(rows.len());
        for (pick, round, position, picker_id, item_id, committed_at, was_auto) in rows {
            selections.push(Selection {
                overall_pick_number: pick,
                round_number: round,
                position_in_round: position,
                picker_id,
                item_id,
                committed_at: parse_timestamp(&committed_at)?,
                was_auto_selected: was_auto,
            });
        }
        Ok(selections)
    }

    /// Return the number of selections recorded for the given session.
    pub fn selection_count(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM selections WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .context("failed to count selections")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Key-value engine state
    // ------------------------------------------------------------------

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE so
    /// repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str =
            serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO engine_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM engine_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query engine state")?;

        match json_str {
            Some(json_str) => {
                let value: serde_json::Value = serde_json::from_str(&json_str)
                    .context("failed to deserialize state value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Key used in the engine_state table to store the active session id.
    const ACTIVE_SESSION_KEY: &'static str = "active_session_id";

    /// Retrieve the stored active session id. Returns `None` if no session
    /// has been persisted yet.
    pub fn get_active_session_id(&self) -> Result<Option<String>> {
        let value = self.load_state(Self::ACTIVE_SESSION_KEY)?;
        Ok(value.and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    /// Persist the active session id to the key-value store.
    pub fn set_active_session_id(&self, session_id: &str) -> Result<()> {
        self.save_state(
            Self::ACTIVE_SESSION_KEY,
            &serde_json::Value::String(session_id.to_string()),
        )
    }
}

fn parse_status(s: &str) -> Result<SessionStatus> {
    match s {
        "pending" => Ok(SessionStatus::Pending),
        "scheduled" => Ok(SessionStatus::Scheduled),
        "in_progress" => Ok(SessionStatus::InProgress),
        "paused" => Ok(SessionStatus::Paused),
        "completed" => Ok(SessionStatus::Completed),
        other => anyhow::bail!("unknown session status in database: {other}"),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in database: {s}"))
}
