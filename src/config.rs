// Configuration loading and parsing (config/draft.toml).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::draft::eligibility::EligibilityMode;
use crate::draft::session::{Discipline, DraftConfiguration};
use crate::draft::standings::ScoringRules;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub session_id: String,
    pub draft: DraftConfiguration,
    pub scoring: ScoringRules,
    pub catalog_path: String,
    pub ws_port: u16,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// draft.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire draft.toml file.
#[derive(Debug, Clone, Deserialize)]
struct DraftFile {
    draft: DraftSection,
    eligibility: EligibilityMode,
    scoring: ScoringRules,
    catalog: CatalogSection,
    websocket: WebsocketSection,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DraftSection {
    session_id: String,
    /// Participant ids in first-round turn order.
    participants: Vec<String>,
    discipline: Discipline,
    rounds_total: u32,
    /// 0 disables the turn timer.
    #[serde(default)]
    turn_budget_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WebsocketSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/draft.toml` relative to the
/// given `base_dir`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("draft.toml");
    let text = read_file(&path)?;
    let file: DraftFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        session_id: file.draft.session_id,
        draft: DraftConfiguration {
            order: file.draft.participants,
            discipline: file.draft.discipline,
            rounds_total: file.draft.rounds_total,
            turn_budget_seconds: file.draft.turn_budget_seconds,
            eligibility: file.eligibility,
        },
        scoring: file.scoring,
        catalog_path: file.catalog.path,
        ws_port: file.websocket.port,
        db_path: file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Convenience wrapper: loads config relative to the current working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.session_id.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "draft.session_id".into(),
            message: "must not be empty".into(),
        });
    }

    // Turn-order and round-count rules live with the draft configuration
    // itself; surface them as config validation errors here.
    config
        .draft
        .validate()
        .map_err(|e| ConfigError::ValidationError {
            field: "draft".into(),
            message: e.to_string(),
        })?;

    if config.catalog_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "catalog.path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
