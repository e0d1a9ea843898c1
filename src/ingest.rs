// =============================================================================
// Ingestion Loop — frames in, routed messages out
// =============================================================================
//
// Reads frames from the transport, decodes each into a `Message`, and routes
// it: control-bearing messages mutate the session state, price-bearing
// messages feed the aggregator, the ring buffer, and the fan-out publisher.
//
// Availability contract: nothing on this path is fatal except a transport
// failure. Malformed frames and unroutable messages are counted and dropped;
// the loop must never block on the batch processor or on slow subscribers.
// A `TransportError` is returned to the caller, which owns retry policy.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::decoder::{self, Message, PriceUpdateData, SnapshotData};
use crate::error::TransportError;
use crate::pipeline_state::PipelineState;
use crate::session;
use crate::transport::FrameSource;
use crate::types::{RawFrame, Tick};

/// Run the ingestion loop until shutdown or a transport failure.
pub async fn run_ingestion<S: FrameSource>(
    state: Arc<PipelineState>,
    mut source: S,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let poll_interval = Duration::from_millis(state.config.read().poll_interval_ms.max(1));

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        match source.next_frame()? {
            Some(frame) => handle_frame(&state, &frame),
            None => {
                // Nothing ready; wait for the poll interval unless shutdown
                // lands first.
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

/// Decode one frame and route the result. Never fails.
pub fn handle_frame(state: &PipelineState, frame: &RawFrame) {
    state.counters.frames_seen.fetch_add(1, Ordering::Relaxed);

    let message = match decoder::decode(frame) {
        Ok(m) => m,
        Err(e) => {
            state
                .counters
                .decode_failures
                .fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, "frame dropped");
            return;
        }
    };

    match message {
        Message::PriceUpdate(update) => route_price_update(state, update, frame.arrival_time),
        Message::HistoricalSnapshot(snapshot) => route_snapshot(state, &snapshot),

        // Everything control-bearing goes to the session tracker, including
        // Unknown, whose text still feeds the auth heuristic.
        msg @ (Message::SessionInfo(_)
        | Message::FavoritesUpdate(_)
        | Message::ChartSettings(_)
        | Message::Unknown(_)) => {
            let counter = match &msg {
                Message::Unknown(_) => &state.counters.unknown_messages,
                _ => &state.counters.session_messages,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            session::apply(&msg, &mut state.session.write());
        }
    }
}

/// Tick path: resolve the instrument and timestamp, then fan the tick out to
/// the aggregator, the ring buffer, and the publisher.
fn route_price_update(state: &PipelineState, update: PriceUpdateData, arrival_time: i64) {
    let default_period = state.config.read().period_secs;

    let (instrument, accepted) = {
        let session = state.session.read();
        let Some(instrument) = update
            .instrument
            .or_else(|| session.focused_instrument.clone())
        else {
            // A bare quote with no focused instrument has nowhere to go.
            state.counters.routing_noops.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let accepted = session.accepts(&instrument);
        (instrument, accepted)
    };

    if !accepted {
        state.counters.focus_rejected.fetch_add(1, Ordering::Relaxed);
        trace!(instrument = %instrument, "tick rejected by focus lock");
        return;
    }

    let tick = Tick {
        instrument,
        timestamp: update.timestamp.unwrap_or(arrival_time),
        price: update.price,
    };

    state
        .aggregator
        .ingest_tick(&tick, &state.session.read(), default_period);

    // Buffer first, then publish: the published tick is always already
    // queued for persistence.
    state.processor.register(&tick.instrument);
    state.tick_buffer.push(tick.clone());
    state.publisher.publish(&tick);

    state.counters.ticks_ingested.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot path: rebuild the series and refresh the historical cache.
fn route_snapshot(state: &PipelineState, snapshot: &SnapshotData) {
    let (default_period, cache_ttl) = {
        let config = state.config.read();
        (
            config.period_secs,
            Duration::from_secs(config.cache_ttl_secs),
        )
    };

    let merged = state
        .aggregator
        .ingest_snapshot(snapshot, &state.session.read(), default_period);

    match merged {
        Some((instrument, period, series)) => {
            state
                .history_cache
                .set(&instrument, period, series, cache_ttl);
            state
                .counters
                .snapshots_merged
                .fetch_add(1, Ordering::Relaxed);
        }
        None => {
            state.counters.routing_noops.fetch_add(1, Ordering::Relaxed);
        }
    }
}
