// =============================================================================
// Tick Ring Buffer — bounded per-instrument most-recent store
// =============================================================================
//
// Every accepted tick lands here regardless of aggregation state. Each
// instrument owns one bounded deque behind its own mutex, so a push for one
// instrument never contends with a drain of another. The outer map lock is
// held only long enough to clone the per-instrument handle.
//
// Insert-then-trim: a push always succeeds; the oldest entries are silently
// dropped once capacity is exceeded. `drain` is read-all-and-clear under the
// instrument's lock, so a concurrent push lands either in the drained batch
// or in the fresh buffer, never both and never neither.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::types::Tick;

pub struct TickRingBuffer {
    buffers: RwLock<HashMap<String, Arc<Mutex<VecDeque<Tick>>>>>,
    capacity: usize,
}

impl TickRingBuffer {
    /// Create a buffer that retains at most `capacity` ticks per instrument.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// The per-instrument deque, created on first use.
    fn bucket(&self, instrument: &str) -> Arc<Mutex<VecDeque<Tick>>> {
        if let Some(b) = self.buffers.read().get(instrument) {
            return b.clone();
        }
        self.buffers
            .write()
            .entry(instrument.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity))))
            .clone()
    }

    /// Append `tick`, then trim the oldest entries until `len <= capacity`.
    pub fn push(&self, tick: Tick) {
        let bucket = self.bucket(&tick.instrument);
        let mut deque = bucket.lock();
        deque.push_back(tick);
        while deque.len() > self.capacity {
            deque.pop_front();
        }
    }

    /// Atomically return-and-empty the instrument's buffer, oldest first.
    pub fn drain(&self, instrument: &str) -> Vec<Tick> {
        let Some(bucket) = self.buffers.read().get(instrument).cloned() else {
            return Vec::new();
        };
        let mut deque = bucket.lock();
        std::mem::take(&mut *deque).into()
    }

    /// Ticks currently held for `instrument`.
    pub fn len(&self, instrument: &str) -> usize {
        self.buffers
            .read()
            .get(instrument)
            .map_or(0, |b| b.lock().len())
    }

    pub fn is_empty(&self, instrument: &str) -> bool {
        self.len(instrument) == 0
    }

    /// Current buffer sizes for every instrument seen so far.
    pub fn sizes(&self) -> HashMap<String, usize> {
        self.buffers
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().len()))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn tick(instrument: &str, timestamp: i64) -> Tick {
        Tick {
            instrument: instrument.into(),
            timestamp,
            price: 1.0 + timestamp as f64 * 1e-4,
        }
    }

    #[test]
    fn push_respects_capacity_and_keeps_most_recent() {
        let buf = TickRingBuffer::new(3);
        for i in 0..7 {
            buf.push(tick("EURUSD", i));
        }

        assert_eq!(buf.len("EURUSD"), 3);
        let drained = buf.drain("EURUSD");
        let timestamps: Vec<i64> = drained.iter().map(|t| t.timestamp).collect();
        assert_eq!(timestamps, vec![4, 5, 6]);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let buf = TickRingBuffer::new(10);
        for i in 0..250 {
            buf.push(tick("GBPUSD", i));
            assert!(buf.len("GBPUSD") <= 10);
        }
    }

    #[test]
    fn drain_empties_and_second_drain_is_empty() {
        let buf = TickRingBuffer::new(100);
        buf.push(tick("EURUSD", 1));
        buf.push(tick("EURUSD", 2));

        let first = buf.drain("EURUSD");
        assert_eq!(first.len(), 2);
        assert!(buf.is_empty("EURUSD"));
        assert!(buf.drain("EURUSD").is_empty());
    }

    #[test]
    fn drain_unknown_instrument_is_empty() {
        let buf = TickRingBuffer::new(100);
        assert!(buf.drain("NOPE").is_empty());
    }

    #[test]
    fn instruments_are_isolated() {
        let buf = TickRingBuffer::new(2);
        buf.push(tick("EURUSD", 1));
        buf.push(tick("GBPUSD", 2));
        buf.push(tick("GBPUSD", 3));
        buf.push(tick("GBPUSD", 4));

        assert_eq!(buf.len("EURUSD"), 1);
        assert_eq!(buf.len("GBPUSD"), 2);

        let sizes = buf.sizes();
        assert_eq!(sizes["EURUSD"], 1);
        assert_eq!(sizes["GBPUSD"], 2);
    }

    #[test]
    fn concurrent_pushes_and_drains_lose_nothing() {
        use std::sync::Arc;
        use std::thread;

        let buf = Arc::new(TickRingBuffer::new(100_000));
        let total: i64 = 2_000;

        let pusher = {
            let buf = buf.clone();
            thread::spawn(move || {
                for i in 0..total {
                    buf.push(tick("EURUSD", i));
                }
            })
        };

        let drainer = {
            let buf = buf.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                while (seen.len() as i64) < total {
                    seen.extend(buf.drain("EURUSD"));
                }
                seen
            })
        };

        pusher.join().unwrap();
        let seen = drainer.join().unwrap();

        // Every push observed exactly once, in order.
        assert_eq!(seen.len() as i64, total);
        for (i, t) in seen.iter().enumerate() {
            assert_eq!(t.timestamp, i as i64);
        }
    }
}
