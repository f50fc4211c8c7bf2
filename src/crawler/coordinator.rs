//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the worker pool that drives a crawl:
//! - Workers ask the scheduler for a lease, fetch the page and process it
//! - Processing deduplicates, extracts and emits records in page order
//! - Expired sessions are replaced once per fetch, transient failures are
//!   retried with backoff, rejected queries are skipped
//! - Fatal errors and cancellation close the budget so every worker drains
//!
//! The run ends when no lease is outstanding and the scheduler has nothing
//! left to dispatch.

use crate::api::{ApiError, RawPost, SearchApi, XrpcClient};
use crate::config::{validate, Config, CrawlMode, RetryAccounting};
use crate::crawler::dedup::Deduplicator;
use crate::crawler::extract::{merge_profile, RecordExtractor};
use crate::crawler::fetcher::{FetchError, Page, PageFetcher};
use crate::crawler::retry::{RetryPolicy, Verdict};
use crate::crawler::scheduler::{Dispatch, QueryLease, QueryScheduler};
use crate::crawler::session::SessionManager;
use crate::output::{open_sink, CrawlReport, NormalizedRecord, QueryReport, RecordSink, UserRecord};
use crate::state::{Cursor, RequestBudget};
use crate::storage::RunStatus;
use crate::CrawlError;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;

/// Stops a running crawl from outside
///
/// Cancelling forces the budget to zero and wakes idle workers. Requests
/// already in flight finish and their pages are still emitted.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    budget: Arc<RequestBudget>,
    notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            tracing::info!("Cancelling crawl");
        }
        self.budget.exhaust();
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct CrawlStats {
    /// Searches and profile lookups sent, retries included
    requests: AtomicU64,
    emitted: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
}

/// What became of one leased fetch
enum FetchOutcome {
    Fetched(Page),
    /// The query is skipped with this reason
    Skipped(String),
    /// The page was not fetched; the lease goes back unchanged
    Released,
}

/// State shared by all workers
struct CrawlContext {
    scheduler: Mutex<QueryScheduler>,
    notify: Arc<Notify>,
    budget: Arc<RequestBudget>,
    api: Arc<dyn SearchApi>,
    sessions: SessionManager,
    fetcher: PageFetcher,
    dedup: Deduplicator,
    extractor: RecordExtractor,
    policy: RetryPolicy,
    sink: Arc<dyn RecordSink>,
    stats: CrawlStats,
    accounting: RetryAccounting,
    enrich_profiles: bool,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Config,
    api: Arc<dyn SearchApi>,
    sink: Arc<dyn RecordSink>,
    budget: Arc<RequestBudget>,
    notify: Arc<Notify>,
    cancel: CancelHandle,
}

impl Coordinator {
    /// Creates a coordinator over an API and a sink
    ///
    /// The configuration is assumed to be validated.
    pub fn new(config: Config, api: Arc<dyn SearchApi>, sink: Arc<dyn RecordSink>) -> Self {
        let budget = Arc::new(RequestBudget::new(config.crawl.max_requests_per_crawl));
        let notify = Arc::new(Notify::new());
        let cancel = CancelHandle {
            budget: Arc::clone(&budget),
            notify: Arc::clone(&notify),
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        Self {
            config,
            api,
            sink,
            budget,
            notify,
            cancel,
        }
    }

    /// Creates a coordinator talking to the configured service and writing
    /// to the configured output
    ///
    /// # Arguments
    ///
    /// * `config` - The crawl configuration
    /// * `config_hash` - Hash recorded with the run in SQLite output
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(CrawlError)` - Invalid configuration, client or output failure
    pub fn from_config(config: Config, config_hash: &str) -> Result<Self, CrawlError> {
        validate(&config)?;

        let timeout = Duration::from_secs(config.crawl.request_timeout_secs);
        let api = XrpcClient::new(&config.auth.service_url, timeout)?;
        let sink = open_sink(&config, config_hash)?;

        Ok(Self::new(config, Arc::new(api), sink))
    }

    /// Handle that cancels this crawl, usable from any task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs the crawl to completion
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - The crawl completed, ran out of budget or was cancelled
    /// * `Err(CrawlError)` - A fatal error aborted the crawl
    pub async fn run(self) -> Result<CrawlReport, CrawlError> {
        let started_at = Utc::now();
        let config = self.config;
        let mode = config.crawl.mode;

        match self.budget.limit() {
            Some(0) => tracing::warn!("Request budget is zero, nothing will be fetched"),
            Some(limit) => tracing::info!(
                "Crawling {} queries in {} mode, budget {} requests",
                config.crawl.queries.len(),
                mode,
                limit
            ),
            None => tracing::info!(
                "Crawling {} queries in {} mode, no request budget",
                config.crawl.queries.len(),
                mode
            ),
        }

        let policy = RetryPolicy::from_config(&config.retry);
        let ctx = Arc::new(CrawlContext {
            scheduler: Mutex::new(QueryScheduler::new(
                &config.crawl.queries,
                Arc::clone(&self.budget),
            )),
            notify: Arc::clone(&self.notify),
            budget: Arc::clone(&self.budget),
            api: Arc::clone(&self.api),
            sessions: SessionManager::new(
                Arc::clone(&self.api),
                config.auth.identifier.clone(),
                config.auth.app_password.clone(),
                policy.clone(),
                config.retry.max_auth_attempts,
            ),
            fetcher: PageFetcher::new(
                Arc::clone(&self.api),
                config.crawl.page_size,
                config.crawl.sort,
            ),
            dedup: Deduplicator::new(mode),
            extractor: RecordExtractor::new(mode),
            policy,
            sink: Arc::clone(&self.sink),
            stats: CrawlStats::default(),
            accounting: config.crawl.retry_accounting,
            enrich_profiles: config.crawl.enrich_profiles && mode == CrawlMode::Users,
        });

        let mut workers = JoinSet::new();
        for id in 0..config.crawl.concurrency.max(1) {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { ctx.worker(id).await });
        }

        let mut failure: Option<CrawlError> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.map_err(|e| CrawlError::Worker(e.to_string())).and_then(|r| r);
            if let Err(e) = result {
                if failure.is_none() {
                    ctx.abort();
                    failure = Some(e);
                } else {
                    tracing::debug!("Additional worker error: {}", e);
                }
            }
        }

        ctx.sessions.close().await;

        if let Some(e) = failure {
            tracing::error!("Crawl aborted: {}", e);
            if let Err(finish_err) = ctx.sink.finish(RunStatus::Failed) {
                tracing::warn!("Failed to finalize output: {}", finish_err);
            }
            return Err(e);
        }

        let (status, queries) = {
            let scheduler = ctx.lock_scheduler();
            let queries: Vec<QueryReport> =
                scheduler.queries().iter().map(QueryReport::from).collect();
            (scheduler.stop_reason(), queries)
        };
        ctx.sink.finish(status.run_status())?;

        let report = CrawlReport {
            status,
            mode: mode.as_str().to_string(),
            budget_charged: ctx.budget.issued(),
            requests_sent: ctx.stats.requests.load(Ordering::Acquire),
            records_emitted: ctx.stats.emitted.load(Ordering::Acquire),
            duplicates_dropped: ctx.stats.duplicates.load(Ordering::Acquire),
            malformed_skipped: ctx.stats.malformed.load(Ordering::Acquire),
            queries,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            "Crawl {}: {} records from {} requests ({} charged) in {}s",
            report.status,
            report.records_emitted,
            report.requests_sent,
            report.budget_charged,
            report.duration_seconds()
        );

        Ok(report)
    }
}

impl CrawlContext {
    fn lock_scheduler(&self) -> MutexGuard<'_, QueryScheduler> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Closes the budget so every worker stops dispatching
    fn abort(&self) {
        self.budget.exhaust();
        self.notify.notify_waiters();
    }

    async fn worker(&self, id: u32) -> Result<(), CrawlError> {
        tracing::debug!("Worker {} started", id);

        loop {
            // Registered before asking, so a lease returned in between still wakes us
            let notified = self.notify.notified();
            let dispatch = self.lock_scheduler().next();

            let lease = match dispatch {
                Dispatch::Fetch(lease) => {
                    drop(notified);
                    lease
                }
                Dispatch::Wait => {
                    notified.await;
                    continue;
                }
                Dispatch::Stop => break,
            };

            let result = self.crawl_page(&lease).await;
            {
                let mut scheduler = self.lock_scheduler();
                match result {
                    Ok(PageResult::Advanced(page)) => {
                        scheduler.advance(lease, page.next_cursor, page.fetched, page.emitted)
                    }
                    Ok(PageResult::Skipped(reason)) => scheduler.abandon(lease, reason),
                    Ok(PageResult::Released) => scheduler.release(lease),
                    Err(e) => {
                        scheduler.release(lease);
                        drop(scheduler);
                        self.abort();
                        return Err(e);
                    }
                }
            }
            self.notify.notify_waiters();
        }

        tracing::debug!("Worker {} finished", id);
        Ok(())
    }

    /// Fetches and processes the page a lease points at
    async fn crawl_page(&self, lease: &QueryLease) -> Result<PageResult, CrawlError> {
        let page = match self.fetch_with_recovery(lease).await? {
            FetchOutcome::Fetched(page) => page,
            FetchOutcome::Skipped(reason) => return Ok(PageResult::Skipped(reason)),
            FetchOutcome::Released => return Ok(PageResult::Released),
        };

        let fetched = page.items.len();
        let emitted = self.emit(lease, &page.items).await?;

        tracing::debug!(
            query = %lease.query,
            fetched,
            emitted,
            remaining = ?self.budget.remaining(),
            "Page processed"
        );

        Ok(PageResult::Advanced(Advanced {
            next_cursor: page.next_cursor,
            fetched,
            emitted,
        }))
    }

    /// Fetches one page, recovering from expired sessions and transient errors
    ///
    /// The first attempt was charged when the lease was dispatched. Under
    /// per-attempt accounting every retry charges one more request.
    async fn fetch_with_recovery(&self, lease: &QueryLease) -> Result<FetchOutcome, CrawlError> {
        let mut retries = 0;
        let mut reauthenticated = false;

        loop {
            let session = self
                .sessions
                .acquire()
                .await
                .map_err(|e| CrawlError::Auth(e.to_string()))?;

            self.stats.requests.fetch_add(1, Ordering::AcqRel);
            let error = match self.fetcher.fetch(&session, &lease.query, &lease.cursor).await {
                Ok(page) => return Ok(FetchOutcome::Fetched(page)),
                Err(FetchError::AuthExpired) if !reauthenticated => {
                    self.sessions.invalidate(&session).await;
                    reauthenticated = true;
                    continue;
                }
                Err(e) => e,
            };

            match self.policy.classify(&error, retries) {
                Verdict::Retryable(delay) if self.policy.can_retry(retries) => {
                    if self.budget.is_closed() {
                        return Ok(FetchOutcome::Released);
                    }
                    if self.accounting == RetryAccounting::PerAttempt && !self.budget.try_charge() {
                        tracing::debug!(query = %lease.query, "No budget left to retry");
                        return Ok(FetchOutcome::Released);
                    }

                    tracing::warn!(
                        "Fetch of {:?} failed ({}), retry {}/{} in {:?}",
                        lease.query,
                        error,
                        retries + 1,
                        self.policy.max_attempts() - 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Verdict::Retryable(_) => {
                    return Ok(FetchOutcome::Skipped(format!(
                        "{} (gave up after {} attempts)",
                        error,
                        retries + 1
                    )))
                }
                Verdict::SkipQuery => return Ok(FetchOutcome::Skipped(error.to_string())),
                Verdict::Fatal => {
                    return Err(CrawlError::Auth(format!(
                        "session refused after re-authentication while fetching {:?}: {}",
                        lease.query, error
                    )))
                }
            }
        }
    }

    /// Deduplicates, extracts and emits the items of a page in order
    async fn emit(&self, lease: &QueryLease, items: &[RawPost]) -> Result<u64, CrawlError> {
        let filtered = self
            .dedup
            .filter_new(items, |raw| self.extractor.extract(raw));
        self.stats
            .duplicates
            .fetch_add(filtered.duplicates as u64, Ordering::AcqRel);

        for e in &filtered.rejected {
            tracing::warn!(query = %lease.query, "Skipping item: {}", e);
        }
        self.stats
            .malformed
            .fetch_add(filtered.rejected.len() as u64, Ordering::AcqRel);

        let mut emitted = 0;
        for mut record in filtered.admitted {
            if self.enrich_profiles {
                if let NormalizedRecord::User(user) = &mut record {
                    self.enrich(user).await;
                }
            }

            self.sink.push(&record)?;
            emitted += 1;
        }

        self.stats.emitted.fetch_add(emitted, Ordering::AcqRel);
        Ok(emitted)
    }

    /// Replaces a user record's author view with the full profile
    ///
    /// Each lookup costs one request. Without budget, or on any failure,
    /// the record keeps the fields the search result carried.
    async fn enrich(&self, user: &mut UserRecord) {
        if !self.budget.try_charge() {
            tracing::trace!("No budget left to enrich {}", user.did);
            return;
        }

        let session = match self.sessions.acquire().await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!("Skipping profile of {}: {}", user.did, e);
                return;
            }
        };

        self.stats.requests.fetch_add(1, Ordering::AcqRel);
        match self.api.get_profile(session.credential(), &user.did).await {
            Ok(profile) => merge_profile(user, profile),
            Err(ApiError::Unauthorized { .. }) => {
                self.sessions.invalidate(&session).await;
                tracing::debug!("Session expired during profile lookup of {}", user.did);
            }
            Err(e) => tracing::debug!("Profile lookup of {} failed: {}", user.did, e),
        }
    }
}

/// What a processed lease reports back to the scheduler
enum PageResult {
    Advanced(Advanced),
    Skipped(String),
    Released,
}

struct Advanced {
    next_cursor: Cursor,
    fetched: usize,
    emitted: u64,
}

/// Runs a crawl against the configured service and output
pub async fn run_crawl(config: Config, config_hash: &str) -> Result<CrawlReport, CrawlError> {
    Coordinator::from_config(config, config_hash)?.run().await
}
