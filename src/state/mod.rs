//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `QueryState`: pagination cursor and counters of one query
//! - `Cursor`: where the next page of a query begins
//! - `RequestBudget`: global request cap shared by all workers

mod budget;
mod query_state;

// Re-export main types
pub use budget::RequestBudget;
pub use query_state::{Cursor, QueryState, TerminalReason};
