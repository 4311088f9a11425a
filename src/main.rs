//! wfsm - workflow state machine daemon
//!
//! Runs a document-approval workflow on a file-backed store and drives its
//! timed transitions until interrupted.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wfsm_core::{Event, Guard, Transition, TransitionTable, Workflow};
use wfsm_storage::{FileStore, FileStoreConfig};
use wfsm_timer::{Config, TimerService};

/// Review window before an approved document expires.
const REVIEW_WINDOW: Duration = Duration::from_secs(5 * 60);

fn document_workflow() -> Result<TransitionTable, wfsm_core::CoreError> {
    TransitionTable::builder("document")
        .initial("new")
        .state("new", |s| s.on("CREATE", "created"))
        .state("created", |s| {
            s.transition(
                Transition::on("APPROVE", "active").guard_with(Guard::ctx_truthy("title")),
            )
            .on("REJECT", "rejected")
        })
        .state("active", |s| {
            s.entry(|cx| {
                tracing::info!(entity_id = %cx.entity.id, "document approved");
                Ok(())
            })
            .after(REVIEW_WINDOW, "expired")
            .on("ARCHIVE", "archived")
        })
        .state("expired", |s| {
            s.entry(|cx| {
                tracing::info!(entity_id = %cx.entity.id, "document expired");
                cx.terminate();
                Ok(())
            })
        })
        .state("rejected", |s| s.terminal())
        .state("archived", |s| s.terminal())
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if WFSM_CONFIG is set, then env overrides)
    let config_path = std::env::var("WFSM_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    let entities_dir = config.storage.entities_dir();
    tracing::info!("Starting wfsm");
    tracing::info!("  Data directory: {}", entities_dir.display());
    tracing::info!(
        "  Scheduler: {} (warmup={}ms, interval={}ms)",
        if config.scheduler.enabled { "enabled" } else { "disabled" },
        config.scheduler.warmup_ms,
        config.scheduler.interval_ms
    );

    let store = Arc::new(FileStore::open_with(
        FileStoreConfig::new(&entities_dir).with_fsync(config.storage.fsync),
    )?);
    let workflow = Workflow::new(document_workflow()?, store);

    // Seed one document per start so the timer path has work to do
    let doc = workflow.create_with(
        format!("doc-{}", workflow.clock().now_millis()),
        json!({"title": "quarterly report"}),
        Event::named("CREATE"),
    )?;
    doc.submit_event(Event::named("APPROVE"));
    tracing::info!(entity_id = doc.id(), state = %doc.state(), "seeded document");

    let timers = TimerService::start(workflow, &config.scheduler);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    timers.shutdown().await;
    tracing::info!("wfsm stopped");

    Ok(())
}
