/// Per-query pagination state
///
/// This module defines the cursor and terminal bookkeeping for each query of a crawl.
use serde::Serialize;
use std::fmt;

/// Pagination position of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// No page fetched yet
    Start,

    /// Opaque token pointing at the next page
    Next(String),

    /// The API signalled there are no more pages
    Exhausted,
}

impl Cursor {
    /// Converts the cursor field of a search response
    ///
    /// An absent or empty cursor means the result set is exhausted.
    pub fn from_response(cursor: Option<String>) -> Self {
        match cursor {
            Some(token) if !token.is_empty() => Cursor::Next(token),
            _ => Cursor::Exhausted,
        }
    }

    /// The value to send as the `cursor` request parameter
    pub fn as_param(&self) -> Option<&str> {
        match self {
            Cursor::Next(token) => Some(token),
            Cursor::Start | Cursor::Exhausted => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Cursor::Exhausted)
    }
}

/// Why a query stopped being scheduled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum TerminalReason {
    /// Pagination ended normally
    Exhausted,

    /// Fetching a page failed after retries; the rest of the query was skipped
    Failed(String),
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Exhausted => f.write_str("exhausted"),
            TerminalReason::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Mutable state of one query
#[derive(Debug, Clone)]
pub struct QueryState {
    /// Position of the query in the crawl input
    pub index: usize,

    /// Query text sent to the search endpoint
    pub query: String,

    pub cursor: Cursor,

    /// Pages fetched successfully
    pub pages: u32,

    /// Records emitted for this query, after deduplication
    pub emitted: u64,

    /// Set once the query will no longer be scheduled
    pub terminal: Option<TerminalReason>,
}

impl QueryState {
    /// Creates the state of a query that has not been fetched yet
    pub fn new(index: usize, query: impl Into<String>) -> Self {
        Self {
            index,
            query: query.into(),
            cursor: Cursor::Start,
            pages: 0,
            emitted: 0,
            terminal: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Records a fetched page
    ///
    /// The query becomes terminal when the next cursor is the exhaustion
    /// sentinel or the API returned no items at all.
    pub fn record_page(&mut self, next_cursor: Cursor, fetched: usize, emitted: u64) {
        self.pages += 1;
        self.emitted += emitted;
        if next_cursor.is_exhausted() || fetched == 0 {
            self.terminal = Some(TerminalReason::Exhausted);
        }
        self.cursor = next_cursor;
    }

    /// Ends the query early after a failure
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.terminal = Some(TerminalReason::Failed(reason.into()));
    }
}
