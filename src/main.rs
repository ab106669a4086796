// Draft engine daemon entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr)
// 2. Load config
// 3. Open database
// 4. Load the item catalog
// 5. Create the engine and application state, recover from the database
// 6. Spawn the WebSocket server task
// 7. Run the application loop until Ctrl+C

use draft_engine::app;
use draft_engine::catalog::Catalog;
use draft_engine::config;
use draft_engine::db;
use draft_engine::draft::engine::DraftEngine;
use draft_engine::ws_server;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Draft engine starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: session={}, {} participants, {} rounds",
        config.session_id,
        config.draft.participant_count(),
        config.draft.rounds_total
    );

    // 3. Open database
    let db = db::Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    // 4. Load the item catalog
    let catalog = Catalog::from_csv_path(std::path::Path::new(&config.catalog_path))
        .context("failed to load catalog")?;
    info!(
        "Loaded {} catalog items in {} categories",
        catalog.len(),
        catalog.categories().len()
    );

    // 5. Create the engine and application state, recover from the database
    let engine = Arc::new(DraftEngine::new(catalog));
    let mut app_state = app::AppState::new(config.clone(), engine, db);
    match app::recover_from_db(&mut app_state) {
        Ok(true) => info!("Session state restored from previous run"),
        Ok(false) => info!("Starting fresh session"),
        Err(e) => {
            error!("Crash recovery failed: {}", e);
            return Err(e.context("crash recovery failed"));
        }
    }

    // 6. Spawn the WebSocket server task
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let ws_port = config.ws_port;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_port, ws_tx).await {
            error!("WebSocket server error: {}", e);
        }
    });

    info!("Application ready. WebSocket server on 127.0.0.1:{ws_port}");

    // 7. Run the application loop until Ctrl+C
    tokio::select! {
        result = app::run(ws_rx, app_state) => {
            if let Err(e) = result {
                error!("Application loop error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    // The server loops forever; stop it explicitly.
    ws_handle.abort();

    info!("Draft engine shut down cleanly");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draft_engine=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
