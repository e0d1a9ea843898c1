// =============================================================================
// Candle Aggregator — per-instrument OHLC reconstruction
// =============================================================================
//
// The tick path is the only place candles are created or mutated in place:
// a tick either opens a new bucket or folds into the newest candle of its
// series. The snapshot path rebuilds a series from a historical payload and
// replaces the live series wholesale; merging is idempotent, so duplicate
// snapshot delivery is harmless.
//
// A period change affects only buckets computed after the change. Candles
// already in a series are never re-bucketed.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::debug;

use crate::decoder::SnapshotData;
use crate::session::SessionState;
use crate::types::{Candle, CandleSeries, Tick};

/// Holds the live candle series for every instrument seen so far.
pub struct CandleAggregator {
    series: RwLock<HashMap<String, CandleSeries>>,
}

impl CandleAggregator {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    // ── Tick path ───────────────────────────────────────────────────────

    /// Fold one tick into its instrument's series. Returns `false` when the
    /// tick was discarded by the focus lock.
    pub fn ingest_tick(&self, tick: &Tick, state: &SessionState, default_period: i64) -> bool {
        // Asset isolation: with focus locked, ticks for any other instrument
        // leave no trace.
        if !state.accepts(&tick.instrument) {
            return false;
        }

        let period = state.effective_period(default_period);
        let bucket = bucket_start(tick.timestamp, period);

        let mut all = self.series.write();
        let series = all.entry(tick.instrument.clone()).or_default();

        match series.last_mut() {
            Some(last) if last.bucket_start >= bucket => {
                // Same bucket, or a late tick: only the newest candle is
                // mutable, so both fold into it.
                last.apply(tick.price);
            }
            _ => {
                debug!(
                    instrument = %tick.instrument,
                    bucket_start = bucket,
                    price = tick.price,
                    "new candle opened"
                );
                series.push(Candle::seed(bucket, tick.price));
            }
        }

        true
    }

    // ── Snapshot path ───────────────────────────────────────────────────

    /// Rebuild a series from a historical snapshot and replace the live one
    /// wholesale. Returns the instrument, the timeframe the snapshot was
    /// bucketed under, and the merged series, for the caller to cache.
    ///
    /// Ingesting the same snapshot twice yields an identical series.
    pub fn ingest_snapshot(
        &self,
        snapshot: &SnapshotData,
        state: &SessionState,
        default_period: i64,
    ) -> Option<(String, i64, CandleSeries)> {
        let instrument = snapshot
            .instrument
            .clone()
            .or_else(|| state.focused_instrument.clone())?;

        if !state.accepts(&instrument) {
            return None;
        }

        let period = match snapshot.period {
            Some(p) if p > 0 => p,
            _ => state.effective_period(default_period),
        };

        // Seed from any finished candles, then merge history pairs into
        // their buckets: update when the bucket exists, insert otherwise.
        let mut merged: BTreeMap<i64, Candle> = snapshot
            .candles
            .iter()
            .map(|c| (c.bucket_start, c.clone()))
            .collect();

        for &(timestamp, price) in &snapshot.history {
            let bucket = bucket_start(timestamp, period);
            merged
                .entry(bucket)
                .and_modify(|c| c.apply(price))
                .or_insert_with(|| Candle::seed(bucket, price));
        }

        let series: CandleSeries = merged.into_values().collect();

        debug!(
            instrument = %instrument,
            period_secs = period,
            candles = series.len(),
            "series replaced from snapshot"
        );

        self.series
            .write()
            .insert(instrument.clone(), series.clone());

        Some((instrument, period, series))
    }

    // ── Read access ─────────────────────────────────────────────────────

    pub fn series(&self, instrument: &str) -> Option<CandleSeries> {
        self.series.read().get(instrument).cloned()
    }

    pub fn instruments(&self) -> Vec<String> {
        self.series.read().keys().cloned().collect()
    }
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Floor `timestamp` to the start of its bucket. Euclidean division keeps
/// pre-epoch timestamps on the correct side.
fn bucket_start(timestamp: i64, period: i64) -> i64 {
    timestamp.div_euclid(period) * period
}
