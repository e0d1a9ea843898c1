// =============================================================================
// Batch Persistence Processor — scheduled ring-buffer drains to a durable
// store
// =============================================================================
//
// Runs independently of ingestion: on a fixed interval, each registered
// instrument's ring buffer is drained atomically and the batch is written to
// the store in one call. Persistence is best-effort by contract: a failed
// write is logged and counted, the drained batch is discarded, and the
// processor moves on to the next instrument. One instrument's failure never
// delays or corrupts another's cycle.
//
// The only synchronization shared with the ingestion loop is the atomic
// drain on one instrument's buffer.
// =============================================================================

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::market_data::TickRingBuffer;
use crate::types::StoredTick;

// =============================================================================
// Store seam
// =============================================================================

/// The durable-store collaborator. The write call is synchronous and
/// fallible; failure triggers the processor's discard-on-failure path.
pub trait TickStore: Send + Sync {
    fn write_batch(&self, instrument: &str, batch: &[StoredTick]) -> Result<(), StoreError>;
}

/// Appends one JSON record per tick to a local file. Stands in for the real
/// store client in development and replay runs.
pub struct JsonlTickStore {
    path: PathBuf,
}

impl JsonlTickStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TickStore for JsonlTickStore {
    fn write_batch(&self, _instrument: &str, batch: &[StoredTick]) -> Result<(), StoreError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut out = String::with_capacity(batch.len() * 64);
        for record in batch {
            let line = serde_json::to_string(record)
                .map_err(|e| StoreError::WriteRejected(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

// =============================================================================
// Status snapshot
// =============================================================================

/// Read-only view of the processor, served by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStatus {
    pub running: bool,
    pub instruments: Vec<String>,
    pub buffer_sizes: HashMap<String, usize>,
    /// Epoch seconds of the last successful write, per instrument.
    pub last_processed: HashMap<String, i64>,
    pub batches_written: u64,
    pub ticks_persisted: u64,
    pub write_failures: u64,
}

// =============================================================================
// BatchProcessor
// =============================================================================

pub struct BatchProcessor {
    buffer: Arc<TickRingBuffer>,
    store: Arc<dyn TickStore>,

    /// Registration order is preserved so drain cycles are predictable.
    registered: RwLock<Vec<String>>,
    last_processed: RwLock<HashMap<String, i64>>,

    running: AtomicBool,
    batches_written: AtomicU64,
    ticks_persisted: AtomicU64,
    write_failures: AtomicU64,
}

impl BatchProcessor {
    pub fn new(buffer: Arc<TickRingBuffer>, store: Arc<dyn TickStore>) -> Self {
        Self {
            buffer,
            store,
            registered: RwLock::new(Vec::new()),
            last_processed: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            batches_written: AtomicU64::new(0),
            ticks_persisted: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Register an instrument for periodic persistence. Idempotent; safe
    /// while a drain cycle is active.
    pub fn register(&self, instrument: &str) {
        let mut registered = self.registered.write();
        if !registered.iter().any(|i| i == instrument) {
            info!(instrument = %instrument, "instrument registered for persistence");
            registered.push(instrument.to_string());
        }
    }

    /// Stop persisting an instrument. Ticks already buffered stay until the
    /// instrument is registered again or the process ends.
    pub fn unregister(&self, instrument: &str) {
        self.registered.write().retain(|i| i != instrument);
    }

    pub fn is_registered(&self, instrument: &str) -> bool {
        self.registered.read().iter().any(|i| i == instrument)
    }

    /// One full drain-and-write pass over all registered instruments.
    pub fn process_cycle(&self) {
        // Snapshot the registration list so register/unregister during the
        // cycle cannot invalidate the iteration.
        let instruments: Vec<String> = self.registered.read().clone();

        for instrument in instruments {
            let batch = self.buffer.drain(&instrument);
            if batch.is_empty() {
                continue;
            }

            let records: Vec<StoredTick> = batch.iter().map(StoredTick::from).collect();
            debug!(instrument = %instrument, count = records.len(), "writing batch");

            match self.store.write_batch(&instrument, &records) {
                Ok(()) => {
                    self.batches_written.fetch_add(1, Ordering::Relaxed);
                    self.ticks_persisted
                        .fetch_add(records.len() as u64, Ordering::Relaxed);
                    self.last_processed
                        .write()
                        .insert(instrument, Utc::now().timestamp());
                }
                Err(e) => {
                    // Best-effort contract: the batch is already drained and
                    // is now gone. Count it and keep the cycle moving.
                    self.write_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        instrument = %instrument,
                        dropped = records.len(),
                        error = %e,
                        "batch write failed, batch discarded"
                    );
                }
            }
        }
    }

    /// The processor loop: wake every `interval`, run one cycle, check the
    /// shutdown signal between iterations. Buffered ticks still in flight at
    /// shutdown may be lost, matching the best-effort contract.
    pub async fn run(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.running.store(true, Ordering::SeqCst);
        info!(interval_secs = interval.as_secs(), "batch processor started");

        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so the first cycle runs a
        // full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.process_cycle(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("batch processor stopped");
    }

    /// Read-only snapshot for the status API.
    pub fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            running: self.running.load(Ordering::SeqCst),
            instruments: self.registered.read().clone(),
            buffer_sizes: self.buffer.sizes(),
            last_processed: self.last_processed.read().clone(),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            ticks_persisted: self.ticks_persisted.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tick;
    use parking_lot::Mutex;

    /// Collects every batch in memory.
    struct MemoryStore {
        written: Mutex<HashMap<String, Vec<StoredTick>>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                written: Mutex::new(HashMap::new()),
            }
        }
    }

    impl TickStore for MemoryStore {
        fn write_batch(&self, instrument: &str, batch: &[StoredTick]) -> Result<(), StoreError> {
            self.written
                .lock()
                .entry(instrument.to_string())
                .or_default()
                .extend_from_slice(batch);
            Ok(())
        }
    }

    /// Fails every write for one instrument, succeeds for the rest.
    struct PartialFailStore {
        failing: String,
        inner: MemoryStore,
    }

    impl TickStore for PartialFailStore {
        fn write_batch(&self, instrument: &str, batch: &[StoredTick]) -> Result<(), StoreError> {
            if instrument == self.failing {
                return Err(StoreError::WriteRejected("store offline".into()));
            }
            self.inner.write_batch(instrument, batch)
        }
    }

    fn tick(instrument: &str, timestamp: i64) -> Tick {
        Tick {
            instrument: instrument.into(),
            timestamp,
            price: 1.08,
        }
    }

    #[test]
    fn cycle_persists_and_clears_buffers() {
        let buffer = Arc::new(TickRingBuffer::new(100));
        let store = Arc::new(MemoryStore::new());
        let processor = BatchProcessor::new(buffer.clone(), store.clone());

        processor.register("EURUSD");
        buffer.push(tick("EURUSD", 1));
        buffer.push(tick("EURUSD", 2));

        processor.process_cycle();

        assert!(buffer.is_empty("EURUSD"));
        assert_eq!(store.written.lock()["EURUSD"].len(), 2);

        let status = processor.status();
        assert_eq!(status.batches_written, 1);
        assert_eq!(status.ticks_persisted, 2);
        assert!(status.last_processed.contains_key("EURUSD"));
    }

    #[test]
    fn empty_buffer_is_skipped() {
        let buffer = Arc::new(TickRingBuffer::new(100));
        let store = Arc::new(MemoryStore::new());
        let processor = BatchProcessor::new(buffer, store.clone());

        processor.register("EURUSD");
        processor.process_cycle();

        assert!(store.written.lock().is_empty());
        assert_eq!(processor.status().batches_written, 0);
        assert!(processor.status().last_processed.is_empty());
    }

    #[test]
    fn unregistered_instruments_are_not_drained() {
        let buffer = Arc::new(TickRingBuffer::new(100));
        let store = Arc::new(MemoryStore::new());
        let processor = BatchProcessor::new(buffer.clone(), store);

        buffer.push(tick("EURUSD", 1));
        processor.process_cycle();

        assert_eq!(buffer.len("EURUSD"), 1);
    }

    #[test]
    fn failure_isolation_between_instruments() {
        let buffer = Arc::new(TickRingBuffer::new(100));
        let store = Arc::new(PartialFailStore {
            failing: "EURUSD".into(),
            inner: MemoryStore::new(),
        });
        let processor = BatchProcessor::new(buffer.clone(), store.clone());

        processor.register("EURUSD");
        processor.register("GBPUSD");
        buffer.push(tick("EURUSD", 1));
        buffer.push(tick("GBPUSD", 2));

        processor.process_cycle();

        // The failed batch is discarded (buffer cleared, nothing stored),
        // the healthy instrument is unaffected.
        assert!(buffer.is_empty("EURUSD"));
        assert!(buffer.is_empty("GBPUSD"));
        assert!(!store.inner.written.lock().contains_key("EURUSD"));
        assert_eq!(store.inner.written.lock()["GBPUSD"].len(), 1);

        let status = processor.status();
        assert_eq!(status.write_failures, 1);
        assert_eq!(status.batches_written, 1);
        assert!(!status.last_processed.contains_key("EURUSD"));
        assert!(status.last_processed.contains_key("GBPUSD"));
    }

    #[test]
    fn register_is_idempotent_and_unregister_removes() {
        let buffer = Arc::new(TickRingBuffer::new(100));
        let processor = BatchProcessor::new(buffer, Arc::new(MemoryStore::new()));

        processor.register("EURUSD");
        processor.register("EURUSD");
        assert_eq!(processor.status().instruments, vec!["EURUSD"]);

        processor.unregister("EURUSD");
        assert!(processor.status().instruments.is_empty());
        assert!(!processor.is_registered("EURUSD"));
    }

    #[test]
    fn jsonl_store_appends_records() {
        let mut path = std::env::temp_dir();
        path.push(format!("tickline_store_test_{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let store = JsonlTickStore::new(&path);
        let batch = vec![
            StoredTick {
                instrument: "EURUSD".into(),
                price: 1.08,
                timestamp: 1,
            },
            StoredTick {
                instrument: "EURUSD".into(),
                price: 1.09,
                timestamp: 2,
            },
        ];
        store.write_batch("EURUSD", &batch).unwrap();
        store.write_batch("EURUSD", &batch[..1].to_vec()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: StoredTick = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.instrument, "EURUSD");
        assert_eq!(first.timestamp, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown_signal() {
        let buffer = Arc::new(TickRingBuffer::new(100));
        let processor = Arc::new(BatchProcessor::new(buffer, Arc::new(MemoryStore::new())));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(
            processor
                .clone()
                .run(std::time::Duration::from_millis(10), rx),
        );

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(processor.status().running);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!processor.status().running);
    }
}
