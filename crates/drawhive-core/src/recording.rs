//! Recording of every command that reaches the access control stage.
//!
//! Recordings are JSON lines, one [`RecordedCommand`] per line. Filtered
//! commands are kept, tagged as such, so a session can be audited and
//! replayed exactly as it was received.

use crate::protocol::Command;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Recording errors.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("Lock error: {0}")]
    Lock(String),
}

/// Result type for recording operations.
pub type RecordingResult<T> = Result<T, RecordingError>;

/// One recorded command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCommand {
    /// True if access control rejected the command.
    #[serde(default)]
    pub filtered: bool,
    pub command: Command,
}

/// Receiver of recorded commands.
pub trait Recorder {
    fn record(&mut self, entry: &RecordedCommand) -> RecordingResult<()>;

    /// Make sure everything recorded so far has been written out.
    fn flush(&mut self) -> RecordingResult<()> {
        Ok(())
    }
}

/// Writes recordings as JSON lines.
pub struct JsonLinesRecorder<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Recorder for JsonLinesRecorder<W> {
    fn record(&mut self, entry: &RecordedCommand) -> RecordingResult<()> {
        serde_json::to_writer(&mut self.writer, entry)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> RecordingResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory recorder for testing. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    entries: Arc<RwLock<Vec<RecordedCommand>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn entries(&self) -> RecordingResult<Vec<RecordedCommand>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| RecordingError::Lock(e.to_string()))?;
        Ok(entries.clone())
    }
}

impl Recorder for MemoryRecorder {
    fn record(&mut self, entry: &RecordedCommand) -> RecordingResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| RecordingError::Lock(e.to_string()))?;
        entries.push(entry.clone());
        Ok(())
    }
}

/// Read a JSON lines recording. Blank lines are skipped.
pub fn read_recording<R: BufRead>(reader: R) -> RecordingResult<Vec<RecordedCommand>> {
    let mut out = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|source| RecordingError::Parse {
            line: index + 1,
            source,
        })?;
        out.push(entry);
    }
    Ok(out)
}
