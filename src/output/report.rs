//! Crawl run report
//!
//! This module provides the end-of-run summary: why the crawl stopped,
//! how many requests it used and what each query produced.

use crate::state::{QueryState, TerminalReason};
use crate::storage::RunStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Why a crawl that did not fail stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every query reached a terminal state
    Completed,

    /// The request budget ran out while queries still had pages
    BudgetExhausted,

    /// The crawl was stopped externally
    Cancelled,
}

impl StopReason {
    pub fn run_status(&self) -> RunStatus {
        match self {
            StopReason::Completed => RunStatus::Completed,
            StopReason::BudgetExhausted => RunStatus::BudgetExhausted,
            StopReason::Cancelled => RunStatus::Cancelled,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => f.write_str("completed"),
            StopReason::BudgetExhausted => f.write_str("budget exhausted"),
            StopReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one query
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub query: String,
    pub pages: u32,
    pub emitted: u64,
    /// `None` when the crawl stopped before the query ended
    pub terminal: Option<TerminalReason>,
}

impl From<&QueryState> for QueryReport {
    fn from(state: &QueryState) -> Self {
        Self {
            query: state.query.clone(),
            pages: state.pages,
            emitted: state.emitted,
            terminal: state.terminal.clone(),
        }
    }
}

/// Summary of a finished crawl
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub status: StopReason,
    pub mode: String,
    /// Requests charged against the budget
    pub budget_charged: u64,
    /// Requests actually sent, retries included
    pub requests_sent: u64,
    pub records_emitted: u64,
    pub duplicates_dropped: u64,
    pub malformed_skipped: u64,
    pub queries: Vec<QueryReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrawlReport {
    /// Queries that ended because of an error
    pub fn failed_queries(&self) -> impl Iterator<Item = &QueryReport> {
        self.queries
            .iter()
            .filter(|q| matches!(q.terminal, Some(TerminalReason::Failed(_))))
    }

    /// Records emitted for the query at `index`
    pub fn emitted_for(&self, index: usize) -> Option<u64> {
        self.queries.get(index).map(|q| q.emitted)
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    /// Writes the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// Prints the report to stdout
pub fn print_report(report: &CrawlReport) {
    println!("=== Crawl Report ===\n");

    println!("Status: {}", report.status);
    println!("Mode: {}", report.mode);
    println!("Requests charged: {}", report.budget_charged);
    println!("Requests sent: {}", report.requests_sent);
    println!("Records emitted: {}", report.records_emitted);
    println!("Duplicates dropped: {}", report.duplicates_dropped);
    println!("Malformed records skipped: {}", report.malformed_skipped);
    println!("Duration: {}s", report.duration_seconds());
    println!();

    println!("Queries ({}):", report.queries.len());
    for query in &report.queries {
        let state = match &query.terminal {
            Some(reason) => reason.to_string(),
            None => "unfinished".to_string(),
        };
        println!(
            "  - {:?}: {} records, {} pages ({})",
            query.query, query.emitted, query.pages, state
        );
    }

    let failed: Vec<_> = report.failed_queries().collect();
    if !failed.is_empty() {
        println!("\nQueries ended early by errors ({}):", failed.len());
        for query in failed {
            println!("  - {:?}", query.query);
        }
    }
}
