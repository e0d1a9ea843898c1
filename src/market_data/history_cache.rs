// =============================================================================
// Historical Cache — TTL-bounded finished candle series
// =============================================================================
//
// The aggregator overwrites an entry every time a snapshot completes a
// series; readers get the candles back until the entry ages out. Expiry is
// checked lazily on read; no background sweep is required, though one can be
// layered on via `purge_expired`.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::CandleSeries;

struct CacheEntry {
    candles: CandleSeries,
    expires_at: Instant,
}

/// Keyed by (instrument, timeframe-seconds).
pub struct HistoryCache {
    entries: RwLock<HashMap<(String, i64), CacheEntry>>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Overwrite the entry for (instrument, timeframe), valid for `ttl`.
    pub fn set(&self, instrument: &str, timeframe: i64, candles: CandleSeries, ttl: Duration) {
        self.entries.write().insert(
            (instrument.to_string(), timeframe),
            CacheEntry {
                candles,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// The cached series, or nothing once the entry has expired. An expired
    /// entry is removed on the read that notices it.
    pub fn get(&self, instrument: &str, timeframe: i64) -> Option<CandleSeries> {
        let key = (instrument.to_string(), timeframe);

        {
            let entries = self.entries.read();
            let entry = entries.get(&key)?;
            if entry.expires_at > Instant::now() {
                return Some(entry.candles.clone());
            }
        }

        self.entries.write().remove(&key);
        None
    }

    /// Number of live entries (expired ones may still be counted until a
    /// read or purge removes them).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Optional; `get` already expires lazily.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at > now);
    }
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    fn candles() -> CandleSeries {
        vec![Candle::seed(0, 1.08), Candle::seed(60, 1.09)]
    }

    #[test]
    fn set_then_get_returns_candles() {
        let cache = HistoryCache::new();
        cache.set("EURUSD", 60, candles(), Duration::from_secs(3600));

        let got = cache.get("EURUSD", 60).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].bucket_start, 0);
    }

    #[test]
    fn set_overwrites_prior_entry() {
        let cache = HistoryCache::new();
        cache.set("EURUSD", 60, candles(), Duration::from_secs(3600));
        cache.set("EURUSD", 60, vec![Candle::seed(120, 1.10)], Duration::from_secs(3600));

        let got = cache.get("EURUSD", 60).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bucket_start, 120);
    }

    #[test]
    fn timeframes_are_distinct_keys() {
        let cache = HistoryCache::new();
        cache.set("EURUSD", 60, candles(), Duration::from_secs(3600));

        assert!(cache.get("EURUSD", 300).is_none());
        assert!(cache.get("GBPUSD", 60).is_none());
        assert!(cache.get("EURUSD", 60).is_some());
    }

    #[test]
    fn expired_entry_is_gone_on_read() {
        let cache = HistoryCache::new();
        cache.set("EURUSD", 60, candles(), Duration::from_secs(0));

        assert!(cache.get("EURUSD", 60).is_none());
        // The lazy expiry also removed it.
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_expired_drops_only_stale_entries() {
        let cache = HistoryCache::new();
        cache.set("EURUSD", 60, candles(), Duration::from_secs(0));
        cache.set("GBPUSD", 60, candles(), Duration::from_secs(3600));

        cache.purge_expired();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("GBPUSD", 60).is_some());
    }
}
