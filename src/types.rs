// =============================================================================
// Shared types used across the Tickline market-data core
// =============================================================================

use serde::{Deserialize, Serialize};

/// One opaque frame as delivered by the upstream transport. The payload is
/// whatever the interception layer captured (base64 text in practice); it is
/// discarded as soon as the decoder has produced a `Message` from it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub payload: String,
    /// Epoch seconds at which the frame reached us. Used as a fallback
    /// timestamp for price updates that do not carry their own.
    pub arrival_time: i64,
}

/// A single price observation for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    /// Epoch seconds.
    pub timestamp: i64,
    pub price: f64,
}

/// One OHLC candle. Mutable only while it is the newest candle in its series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Start of the time bucket, epoch seconds. Always a multiple of the
    /// aggregation period it was produced under.
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Seed a fresh candle from the first price seen in a bucket.
    pub fn seed(bucket_start: i64, price: f64) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold one more price into this candle.
    pub fn apply(&mut self, price: f64) {
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
    }
}

/// An ordered candle sequence for one instrument, strictly increasing by
/// `bucket_start`.
pub type CandleSeries = Vec<Candle>;

/// The record shape handed to the durable store, one per buffered tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTick {
    pub instrument: String,
    pub price: f64,
    pub timestamp: i64,
}

impl From<&Tick> for StoredTick {
    fn from(tick: &Tick) -> Self {
        Self {
            instrument: tick.instrument.clone(),
            price: tick.price,
            timestamp: tick.timestamp,
        }
    }
}
