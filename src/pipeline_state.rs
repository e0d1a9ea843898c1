// =============================================================================
// Central Pipeline State — Tickline market-data core
// =============================================================================
//
// The single source of truth for the running pipeline. The ingestion loop,
// the batch processor, and the status API all hold Arc references to this.
//
// Thread safety:
//   - Atomic counters for lock-free ingest statistics.
//   - parking_lot::RwLock for the session state and config; lock scope is
//     always "the whole SessionState" or "one instrument's buffer", never
//     finer, to keep locking auditable.
//   - Subsystems manage their own interior mutability behind Arc.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::market_data::{CandleAggregator, HistoryCache, TickPublisher, TickRingBuffer};
use crate::persistence::{BatchProcessor, ProcessorStatus, TickStore};
use crate::session::SessionState;

// =============================================================================
// Ingest counters
// =============================================================================

/// Per-kind counters for everything the ingestion loop has seen. The only
/// user-visible failure surface for decode and routing problems.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub frames_seen: AtomicU64,
    pub decode_failures: AtomicU64,
    pub ticks_ingested: AtomicU64,
    pub snapshots_merged: AtomicU64,
    pub session_messages: AtomicU64,
    pub unknown_messages: AtomicU64,
    pub focus_rejected: AtomicU64,
    pub routing_noops: AtomicU64,
}

/// Serialisable snapshot of [`IngestCounters`].
#[derive(Debug, Clone, Serialize)]
pub struct IngestCountersSnapshot {
    pub frames_seen: u64,
    pub decode_failures: u64,
    pub ticks_ingested: u64,
    pub snapshots_merged: u64,
    pub session_messages: u64,
    pub unknown_messages: u64,
    pub focus_rejected: u64,
    pub routing_noops: u64,
}

impl IngestCounters {
    pub fn snapshot(&self) -> IngestCountersSnapshot {
        IngestCountersSnapshot {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            ticks_ingested: self.ticks_ingested.load(Ordering::Relaxed),
            snapshots_merged: self.snapshots_merged.load(Ordering::Relaxed),
            session_messages: self.session_messages.load(Ordering::Relaxed),
            unknown_messages: self.unknown_messages.load(Ordering::Relaxed),
            focus_rejected: self.focus_rejected.load(Ordering::Relaxed),
            routing_noops: self.routing_noops.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// PipelineState
// =============================================================================

/// Central state shared across all async tasks via `Arc<PipelineState>`.
pub struct PipelineState {
    pub config: RwLock<PipelineConfig>,
    pub session: RwLock<SessionState>,

    pub aggregator: CandleAggregator,
    pub tick_buffer: Arc<TickRingBuffer>,
    pub publisher: TickPublisher,
    pub history_cache: HistoryCache,
    pub processor: Arc<BatchProcessor>,

    pub counters: IngestCounters,
    pub start_time: std::time::Instant,
}

impl PipelineState {
    /// Construct the pipeline from configuration and a durable-store client.
    /// The returned value is typically wrapped in `Arc` immediately.
    pub fn new(config: PipelineConfig, store: Arc<dyn TickStore>) -> Self {
        let tick_buffer = Arc::new(TickRingBuffer::new(config.ring_buffer_capacity));
        let processor = Arc::new(BatchProcessor::new(tick_buffer.clone(), store));

        // A pre-configured focus instrument is persisted from the start;
        // everything else registers on first data.
        if let Some(focus) = &config.focus_instrument {
            processor.register(focus);
        }

        let session = SessionState::from_config(
            config.focus_instrument.clone(),
            config.focus_locked,
            config.period_locked,
        );

        Self {
            config: RwLock::new(config),
            session: RwLock::new(session),
            aggregator: CandleAggregator::new(),
            tick_buffer,
            publisher: TickPublisher::new(),
            history_cache: HistoryCache::new(),
            processor,
            counters: IngestCounters::default(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Build the complete read-only status snapshot served by the API.
    pub fn build_status(&self) -> StatusSnapshot {
        StatusSnapshot {
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            session: self.session.read().clone(),
            ingest: self.counters.snapshot(),
            processor: self.processor.status(),
            cached_series: self.history_cache.len(),
        }
    }
}

/// Full pipeline status, serialised for `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub server_time: i64,
    pub uptime_secs: u64,
    pub session: SessionState,
    pub ingest: IngestCountersSnapshot,
    pub processor: ProcessorStatus,
    pub cached_series: usize,
}
