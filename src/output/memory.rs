use crate::output::traits::{OutputError, OutputResult, RecordSink};
use crate::output::NormalizedRecord;
use crate::storage::RunStatus;
use std::sync::Mutex;

/// Collects records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<NormalizedRecord>>,
    status: Mutex<Option<RunStatus>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records pushed so far, in emission order
    pub fn records(&self) -> Vec<NormalizedRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status passed to `finish`, if it was called
    pub fn final_status(&self) -> Option<RunStatus> {
        self.status.lock().ok().and_then(|status| *status)
    }
}

impl RecordSink for MemorySink {
    fn push(&self, record: &NormalizedRecord) -> OutputResult<()> {
        self.records
            .lock()
            .map_err(|e| OutputError::Write(format!("Failed to lock records: {}", e)))?
            .push(record.clone());
        Ok(())
    }

    fn finish(&self, status: RunStatus) -> OutputResult<()> {
        *self
            .status
            .lock()
            .map_err(|e| OutputError::Write(format!("Failed to lock status: {}", e)))? =
            Some(status);
        Ok(())
    }
}
