// =============================================================================
// Error taxonomy for the Tickline pipeline
// =============================================================================
//
// Nothing in the decoder, session tracker, or aggregator is ever fatal: those
// paths surface failures as counted, logged values and the ingestion loop
// keeps running. Only a transport failure escapes the loop, and the caller
// decides whether to retry or stop.
// =============================================================================

use thiserror::Error;

/// A frame that could not be turned into a `Message`. Dropped and counted,
/// never fatal.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// A failed batch write to the durable store. The drained batch is discarded
/// and the processor moves on to the next instrument.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch write rejected: {0}")]
    WriteRejected(String),
}

/// A failure of the frame source itself. Propagated to the ingestion loop's
/// caller; reconnection policy lives there, not in this core.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame source closed")]
    Closed,
}
