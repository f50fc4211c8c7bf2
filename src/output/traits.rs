//! Record sink trait and error types
//!
//! This module defines the interface the crawl engine pushes records into.

use crate::output::NormalizedRecord;
use crate::storage::{RunStatus, StorageError};
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination of emitted records
///
/// Records arrive one at a time in emission order. Implementations must be
/// thread-safe; calls are short and may block briefly on I/O.
pub trait RecordSink: Send + Sync {
    /// Accepts one record
    fn push(&self, record: &NormalizedRecord) -> OutputResult<()>;

    /// Flushes pending data and records the final run status
    ///
    /// # Arguments
    ///
    /// * `status` - The final status of the crawl run
    fn finish(&self, status: RunStatus) -> OutputResult<()>;
}
