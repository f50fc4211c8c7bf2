//! Output module for emitted records and run reports
//!
//! This module handles:
//! - Normalized record types
//! - Record sinks (JSON Lines, SQLite, in-memory)
//! - The end-of-run report

mod jsonl;
mod memory;
mod record;
mod report;
mod sqlite_output;
mod traits;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;
pub use record::{NormalizedRecord, PostMetrics, PostRecord, UserRecord};
pub use report::{print_report, CrawlReport, QueryReport, StopReason};
pub use sqlite_output::SqliteSink;
pub use traits::{OutputError, OutputResult, RecordSink};

use crate::config::{Config, OutputFormat};
use std::path::Path;
use std::sync::Arc;

/// Opens the sink described by the output configuration
///
/// # Arguments
///
/// * `config` - The crawl configuration
/// * `config_hash` - Hash recorded with the run (SQLite only)
pub fn open_sink(config: &Config, config_hash: &str) -> OutputResult<Arc<dyn RecordSink>> {
    let path = Path::new(&config.output.path);
    let sink: Arc<dyn RecordSink> = match config.output.format {
        OutputFormat::Jsonl => Arc::new(JsonLinesSink::create(path)?),
        OutputFormat::Sqlite => Arc::new(SqliteSink::open(
            path,
            config_hash,
            config.crawl.mode.as_str(),
        )?),
    };
    tracing::info!(
        "Writing {} records to {} ({:?})",
        config.crawl.mode,
        path.display(),
        config.output.format
    );
    Ok(sink)
}
