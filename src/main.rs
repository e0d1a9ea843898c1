// =============================================================================
// Tickline — Main Entry Point
// =============================================================================
//
// Wires the pipeline together: config, shared state, the ingestion loop, the
// batch persistence loop, and the read-only status API. Ingestion and
// persistence run independently; the only thing they share is the session
// state and the per-instrument ring buffers.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod config;
mod decoder;
mod error;
mod ingest;
mod market_data;
mod persistence;
mod pipeline_state;
mod session;
mod transport;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::persistence::JsonlTickStore;
use crate::pipeline_state::PipelineState;
use crate::transport::LogFileSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Tickline market-data core starting up");

    let mut config = PipelineConfig::load("tickline.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        PipelineConfig::default()
    });

    // Env overrides for the operational knobs.
    if let Ok(focus) = std::env::var("TICKLINE_FOCUS") {
        let focus = focus.trim().to_string();
        if !focus.is_empty() {
            config.focus_instrument = Some(focus);
            config.focus_locked = true;
        }
    }
    if let Ok(log) = std::env::var("TICKLINE_FRAME_LOG") {
        config.frame_log = log;
    }

    info!(
        period_secs = config.period_secs,
        ring_buffer_capacity = config.ring_buffer_capacity,
        batch_interval_secs = config.batch_interval_secs,
        focus = ?config.focus_instrument,
        focus_locked = config.focus_locked,
        frame_log = %config.frame_log,
        "pipeline configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let store = Arc::new(JsonlTickStore::new(&config.store_path));
    let state = Arc::new(PipelineState::new(config.clone(), store));

    // One shutdown signal for every loop; flipped once on ctrl-c.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // ── 3. Batch persistence loop ────────────────────────────────────────
    let batch_interval = Duration::from_secs(config.batch_interval_secs.max(1));
    let processor_handle = tokio::spawn(
        state
            .processor
            .clone()
            .run(batch_interval, shutdown_rx.clone()),
    );

    // ── 4. Ingestion loop ────────────────────────────────────────────────
    // A transport failure ends one pass; the wrapper owns the retry policy
    // and backs off before re-opening the frame log.
    let ingest_state = state.clone();
    let ingest_shutdown = shutdown_rx.clone();
    let frame_log = config.frame_log.clone();
    let ingest_handle = tokio::spawn(async move {
        loop {
            let source = LogFileSource::tail(&frame_log);
            match ingest::run_ingestion(ingest_state.clone(), source, ingest_shutdown.clone())
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, "transport failed, reopening in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    if *ingest_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // ── 5. Status API ────────────────────────────────────────────────────
    let bind_addr =
        std::env::var("TICKLINE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "status API listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "status API failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind status API"),
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    // Lossy by contract: buffered ticks still in flight may be dropped.
    let _ = shutdown_tx.send(true);
    let _ = ingest_handle.await;
    let _ = processor_handle.await;

    if let Err(e) = state.config.read().save("tickline.json") {
        error!(error = %e, "Failed to save config on shutdown");
    }

    let counters = state.counters.snapshot();
    info!(
        frames_seen = counters.frames_seen,
        ticks_ingested = counters.ticks_ingested,
        decode_failures = counters.decode_failures,
        "Tickline shut down complete"
    );
    Ok(())
}
