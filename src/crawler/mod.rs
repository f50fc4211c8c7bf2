//! Crawler module for topic-driven search crawling
//!
//! This module contains the core crawling logic, including:
//! - Session creation and replacement
//! - Round-robin query scheduling under a request budget
//! - Page fetching with retry and backoff
//! - Cross-query deduplication and record extraction
//! - Overall crawl coordination

mod coordinator;
mod dedup;
mod extract;
mod fetcher;
mod retry;
mod scheduler;
mod session;

pub use coordinator::{run_crawl, CancelHandle, Coordinator};
pub use dedup::{dedup_key, DedupKey, Deduplicator, Filtered};
pub use extract::{merge_profile, MalformedRecord, RecordExtractor};
pub use fetcher::{FetchError, Page, PageFetcher};
pub use retry::{RetryPolicy, Verdict};
pub use scheduler::{Dispatch, QueryLease, QueryScheduler};
pub use session::{AuthError, Session, SessionManager};

use crate::config::Config;
use crate::output::CrawlReport;
use crate::CrawlError;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Validate the configuration
/// 2. Build the XRPC client and open the output sink
/// 3. Authenticate on first use
/// 4. Fetch pages round-robin until every query ends or the budget runs out
/// 5. Finalize the output and close the session
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration, recorded with SQLite output
///
/// # Returns
///
/// * `Ok(CrawlReport)` - The crawl stopped normally; the report says why
/// * `Err(CrawlError)` - The crawl failed
pub async fn crawl(config: Config, config_hash: &str) -> Result<CrawlReport, CrawlError> {
    run_crawl(config, config_hash).await
}
