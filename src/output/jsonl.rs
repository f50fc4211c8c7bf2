//! JSON Lines dataset writer

use crate::output::traits::{OutputError, OutputResult, RecordSink};
use crate::output::NormalizedRecord;
use crate::storage::RunStatus;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write + Send = BufWriter<File>> {
    writer: Mutex<W>,
}

impl JsonLinesSink {
    /// Creates (or truncates) the file at `path`
    pub fn create(path: &Path) -> OutputResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wraps an arbitrary writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn push(&self, record: &NormalizedRecord) -> OutputResult<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| OutputError::Write(format!("Failed to lock writer: {}", e)))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&self, _status: RunStatus) -> OutputResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| OutputError::Write(format!("Failed to lock writer: {}", e)))?;
        writer.flush()?;
        Ok(())
    }
}
