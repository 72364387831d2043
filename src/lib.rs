pub mod aggregator;
pub mod archive;
pub mod db;
pub mod errors;
pub mod handshake;
pub mod host;
pub mod loopback;
pub mod models;
pub mod protocol;
pub mod settings;
pub mod supervisor;
pub mod task;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use archive::DataArchive;
use db::Database;
use handshake::HostController;
use host::TrialSequence;
use loopback::{ConsolePage, LoopbackFrame, LoopbackOptions, SimulatedGazeTask};
use models::TaskConfig;
use settings::{BridgeSettings, SettingsStore};

/// Longest stored value echoed to the log after a run.
const PREVIEW_CHARS: usize = 120;

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    let level = if settings::debug_mode() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    info!("taskbridge starting up...");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run_loopback_session()) {
        log::error!("taskbridge failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run_loopback_session() -> Result<()> {
    let data_dir = settings::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let fallback = if settings::debug_mode() {
        BridgeSettings::debug()
    } else {
        BridgeSettings::default()
    };
    let settings_store = SettingsStore::new(data_dir.join("settings.json"), fallback)?;
    let settings = settings_store.get();
    info!("Settings loaded from {}", settings_store.path().display());

    let database = Database::new(data_dir.join("taskbridge.sqlite3"))?;
    info!("Database ready at {}", database.path().display());

    // Sessions a crashed run left open can never complete now.
    for session in database.get_incomplete_sessions().await? {
        warn!(
            "Recovered incomplete session {} ({}); marking as abandoned",
            session.id, session.state
        );
        database
            .mark_session_abandoned(&session.id, Utc::now())
            .await?;
    }

    let config = TaskConfig {
        session_id: Uuid::new_v4().to_string(),
        study_id: Some("loopback".into()),
        subject_id: Some("demo".into()),
        trials_per_block: None,
    };

    let mut options = LoopbackOptions::new(settings.expected_origin.clone());
    options.delivery = settings.delivery_mode;
    let (frame, events) = LoopbackFrame::new(
        options,
        Arc::new(|| Box::new(SimulatedGazeTask::new()) as Box<dyn TrialSequence>),
    );

    let mut controller = HostController::new(
        settings.clone(),
        config,
        Arc::new(frame),
        Arc::new(ConsolePage),
        database.clone(),
    );
    if settings.archive_raw_data {
        let archive = DataArchive::new(data_dir.join("archive"));
        info!("Archiving raw data to {}", archive.dir().display());
        controller = controller.with_archive(archive);
    }

    let pump = tokio::spawn(loopback::drive(controller.clone(), events));
    let info = controller.start().await?;
    let state = controller.wait_until_advanced().await;
    pump.abort();

    info!("session {} finished as {state}", info.id);
    for (key, value) in database.list_embedded_data(&info.id).await? {
        let preview: String = value.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if value.chars().count() > PREVIEW_CHARS { "..." } else { "" };
        info!("  {key} = {preview}{ellipsis}");
    }

    Ok(())
}
