// =============================================================================
// Pipeline Configuration — Hot-loadable settings with atomic save
// =============================================================================
//
// Every tunable parameter of the pipeline lives here. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_period_secs() -> i64 {
    60
}

fn default_ring_buffer_capacity() -> usize {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_batch_interval_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_frame_log() -> String {
    "frames.log".to_string()
}

fn default_store_path() -> String {
    "ticks.jsonl".to_string()
}

// =============================================================================
// PipelineConfig
// =============================================================================

/// Top-level configuration for the Tickline pipeline.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // --- Aggregation ---------------------------------------------------------

    /// Candle period in seconds, used whenever the session has not yet learned
    /// the active chart period from the transport.
    #[serde(default = "default_period_secs")]
    pub period_secs: i64,

    /// When set, chart-settings messages may not change the active period.
    #[serde(default)]
    pub period_locked: bool,

    // --- Focus ---------------------------------------------------------------

    /// Instrument the operator has manually selected, if any.
    #[serde(default)]
    pub focus_instrument: Option<String>,

    /// When set, ticks for any other instrument are discarded and asynchronous
    /// instrument echoes from the transport cannot move the focus.
    #[serde(default)]
    pub focus_locked: bool,

    // --- Buffering & persistence --------------------------------------------

    /// Maximum ticks retained per instrument between persistence drains.
    #[serde(default = "default_ring_buffer_capacity")]
    pub ring_buffer_capacity: usize,

    /// Time-to-live for cached historical candle series, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// How often the batch persistence processor wakes, in seconds.
    #[serde(default = "default_batch_interval_secs")]
    pub batch_interval_secs: u64,

    /// JSONL file the batch processor appends persisted ticks to.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    // --- Transport -----------------------------------------------------------

    /// Append-only frame log the shipped `LogFileSource` polls.
    #[serde(default = "default_frame_log")]
    pub frame_log: String,

    /// Poll interval for the frame log, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            period_locked: false,
            focus_instrument: None,
            focus_locked: false,
            ring_buffer_capacity: default_ring_buffer_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            batch_interval_secs: default_batch_interval_secs(),
            store_path: default_store_path(),
            frame_log: default_frame_log(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse pipeline config from {}", path.display()))?;

        info!(
            path = %path.display(),
            period_secs = config.period_secs,
            ring_buffer_capacity = config.ring_buffer_capacity,
            focus = ?config.focus_instrument,
            "pipeline config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise pipeline config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "pipeline config saved (atomic)");
        Ok(())
    }
}
