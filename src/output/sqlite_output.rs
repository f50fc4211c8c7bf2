//! SQLite-based record sink
//!
//! This module provides a sink that writes records into the SQLite dataset
//! and tracks the run they belong to.

use crate::output::traits::{OutputError, OutputResult, RecordSink};
use crate::output::NormalizedRecord;
use crate::storage::{RunStatus, SqliteDataset};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-based record sink
pub struct SqliteSink {
    dataset: Mutex<SqliteDataset>,
    run_id: i64,
}

impl SqliteSink {
    /// Opens the dataset at `path` and starts a new run in it
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `config_hash` - Hash of the configuration driving this run
    /// * `mode` - Crawl mode, recorded with the run
    pub fn open(path: &Path, config_hash: &str, mode: &str) -> OutputResult<Self> {
        Self::with_dataset(SqliteDataset::new(path)?, config_hash, mode)
    }

    /// Starts a new run in an already opened dataset
    pub fn with_dataset(
        mut dataset: SqliteDataset,
        config_hash: &str,
        mode: &str,
    ) -> OutputResult<Self> {
        let run_id = dataset.create_run(config_hash, mode)?;
        tracing::debug!(run_id, "Started dataset run");
        Ok(Self {
            dataset: Mutex::new(dataset),
            run_id,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Runs `f` with the locked dataset
    pub fn with_dataset_ref<T>(&self, f: impl FnOnce(&SqliteDataset) -> T) -> OutputResult<T> {
        let dataset = self
            .dataset
            .lock()
            .map_err(|e| OutputError::Write(format!("Failed to lock dataset: {}", e)))?;
        Ok(f(&dataset))
    }
}

impl RecordSink for SqliteSink {
    fn push(&self, record: &NormalizedRecord) -> OutputResult<()> {
        let mut dataset = self
            .dataset
            .lock()
            .map_err(|e| OutputError::Write(format!("Failed to lock dataset: {}", e)))?;

        let inserted = match record {
            NormalizedRecord::Post(post) => dataset.insert_post(self.run_id, post)?,
            NormalizedRecord::User(user) => dataset.insert_user(self.run_id, user)?,
        };

        if !inserted {
            tracing::debug!(id = record.id(), "Record already present in dataset");
        }

        Ok(())
    }

    fn finish(&self, status: RunStatus) -> OutputResult<()> {
        let mut dataset = self
            .dataset
            .lock()
            .map_err(|e| OutputError::Write(format!("Failed to lock dataset: {}", e)))?;
        dataset.finish_run(self.run_id, status)?;
        Ok(())
    }
}
