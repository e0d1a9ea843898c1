// =============================================================================
// Frame Transport — the boundary to the interception layer
// =============================================================================
//
// The transport that physically captures frames is an external collaborator;
// this module only defines the seam. `FrameSource` hands the ingestion loop
// zero or one frame per call; a transport failure is returned to the caller,
// which owns the retry/stop decision. The shipped implementation tails an
// append-only log file the interception layer writes one frame per line to.
// =============================================================================

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::error::TransportError;
use crate::types::RawFrame;

/// An opaque source of encoded frames. `Ok(None)` means no frame is ready;
/// the caller decides how long to wait before asking again.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError>;
}

// =============================================================================
// LogFileSource
// =============================================================================

/// Tails an append-only frame log: one base64 frame per line. The file may
/// not exist yet when the pipeline starts; that is not an error, the writer
/// simply has not produced anything.
pub struct LogFileSource {
    path: PathBuf,
    offset: u64,
}

impl LogFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: 0,
        }
    }

    /// Resume from the end of the current file contents, skipping frames
    /// captured before this pipeline run.
    pub fn tail(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self { path, offset }
    }
}

impl FrameSource for LogFileSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // The log may have been truncated and restarted by the writer.
        let len = file.metadata()?.len();
        if len < self.offset {
            debug!(path = %self.path.display(), "frame log truncated, restarting from 0");
            self.offset = 0;
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }

        // A line without a trailing newline is still being written; wait for
        // the writer to finish it.
        if !line.ends_with('\n') {
            return Ok(None);
        }

        self.offset += read as u64;

        let payload = line.trim().to_string();
        if payload.is_empty() {
            return Ok(None);
        }

        Ok(Some(RawFrame {
            payload,
            arrival_time: Utc::now().timestamp(),
        }))
    }
}
