//! Query scheduler
//!
//! This module handles:
//! - Round-robin selection of the query whose next page is fetched
//! - Charging the request budget before every dispatch
//! - Tracking leased (in-flight) queries so a query is never fetched twice at once
//! - Deciding when the crawl is over and why
//!
//! The scheduler is plain state; the coordinator wraps it in a mutex and
//! wakes waiting workers whenever a lease is returned.

use crate::output::StopReason;
use crate::state::{Cursor, QueryState, RequestBudget};
use std::collections::VecDeque;
use std::sync::Arc;

/// Permission to fetch the next page of one query
///
/// Exactly one lease exists per query at any time. It must be handed back
/// through [`QueryScheduler::advance`], [`QueryScheduler::abandon`] or
/// [`QueryScheduler::release`].
#[derive(Debug)]
pub struct QueryLease {
    /// Position of the query in the crawl input
    pub index: usize,

    pub query: String,

    /// Cursor of the page to fetch
    pub cursor: Cursor,
}

/// Answer to a worker asking for work
#[derive(Debug)]
pub enum Dispatch {
    /// Fetch this page; one request has been charged to the budget
    Fetch(QueryLease),

    /// Every live query is leased to another worker
    Wait,

    /// No more requests will be dispatched
    Stop,
}

/// Round-robin scheduler over the queries of a crawl
#[derive(Debug)]
pub struct QueryScheduler {
    /// Query states, indexed by input position
    queries: Vec<QueryState>,

    /// Non-terminal queries not currently leased, least recently advanced first
    ready: VecDeque<usize>,

    /// Number of outstanding leases
    in_flight: usize,

    budget: Arc<RequestBudget>,
}

impl QueryScheduler {
    /// Creates a scheduler over `queries`, in input order
    pub fn new<S: AsRef<str>>(queries: &[S], budget: Arc<RequestBudget>) -> Self {
        let queries: Vec<QueryState> = queries
            .iter()
            .enumerate()
            .map(|(index, query)| QueryState::new(index, query.as_ref()))
            .collect();
        let ready = (0..queries.len()).collect();

        Self {
            queries,
            ready,
            in_flight: 0,
            budget,
        }
    }

    /// Picks the next page to fetch
    ///
    /// Returns the least recently advanced query that is neither terminal
    /// nor leased, after charging one request. Charging happens before the
    /// query leaves the ring, so a refused charge leaves the state untouched.
    pub fn next(&mut self) -> Dispatch {
        if self.ready.is_empty() {
            // Nothing outstanding can be dispatched again once the budget is spent
            return if self.in_flight == 0 || self.budget.is_exhausted() {
                Dispatch::Stop
            } else {
                Dispatch::Wait
            };
        }

        if !self.budget.try_charge() {
            tracing::debug!(
                "Budget exhausted after {} requests, {} queries still open",
                self.budget.issued(),
                self.open_queries()
            );
            return Dispatch::Stop;
        }

        let Some(index) = self.ready.pop_front() else {
            return Dispatch::Stop;
        };
        self.in_flight += 1;

        let state = &self.queries[index];
        tracing::trace!("Dispatching query #{} {:?} at {:?}", index, state.query, state.cursor);
        Dispatch::Fetch(QueryLease {
            index,
            query: state.query.clone(),
            cursor: state.cursor.clone(),
        })
    }

    /// Returns a lease after a page was fetched and processed
    ///
    /// # Arguments
    ///
    /// * `lease` - The lease the page was fetched under
    /// * `next_cursor` - Cursor reported by the page
    /// * `fetched` - Items the API returned, before deduplication
    /// * `emitted` - Records emitted from the page
    pub fn advance(&mut self, lease: QueryLease, next_cursor: Cursor, fetched: usize, emitted: u64) {
        self.in_flight = self.in_flight.saturating_sub(1);

        let state = &mut self.queries[lease.index];
        state.record_page(next_cursor, fetched, emitted);

        if state.is_terminal() {
            tracing::info!(
                "Query {:?} finished after {} pages, {} records",
                state.query,
                state.pages,
                state.emitted
            );
        } else {
            self.ready.push_back(lease.index);
        }
    }

    /// Returns a lease for a query that failed and will not be retried
    pub fn abandon(&mut self, lease: QueryLease, reason: impl Into<String>) {
        self.in_flight = self.in_flight.saturating_sub(1);

        let state = &mut self.queries[lease.index];
        state.fail(reason);
        tracing::warn!("Query {:?} skipped: {:?}", state.query, state.terminal);
    }

    /// Returns a lease whose page was not fetched
    ///
    /// The query keeps its cursor and goes to the front of the ring.
    pub fn release(&mut self, lease: QueryLease) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if !self.queries[lease.index].is_terminal() {
            self.ready.push_front(lease.index);
        }
    }

    /// Whether every query reached a terminal state
    pub fn all_terminal(&self) -> bool {
        self.queries.iter().all(QueryState::is_terminal)
    }

    /// Queries that are not terminal
    pub fn open_queries(&self) -> usize {
        self.queries.iter().filter(|q| !q.is_terminal()).count()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Why dispatching ended
    ///
    /// Meaningful once no lease is outstanding.
    pub fn stop_reason(&self) -> StopReason {
        if self.all_terminal() {
            StopReason::Completed
        } else if self.budget.is_closed() {
            StopReason::Cancelled
        } else {
            StopReason::BudgetExhausted
        }
    }

    pub fn queries(&self) -> &[QueryState] {
        &self.queries
    }
}
