use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Global cap on the number of API requests a crawl may issue
///
/// Shared by all workers. Charging is a single atomic step, so concurrent
/// workers can never issue more requests than the limit allows.
#[derive(Debug)]
pub struct RequestBudget {
    /// `None` means unlimited
    limit: Option<u64>,

    /// Requests charged so far
    issued: AtomicU64,

    /// Set when the crawl is stopped externally
    closed: AtomicBool,
}

impl RequestBudget {
    /// Creates a budget with the given limit (`None` for unlimited)
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            issued: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a budget without a limit
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Charges one request
    ///
    /// Returns `false`, without charging, when the budget is exhausted.
    pub fn try_charge(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        match self.limit {
            None => {
                self.issued.fetch_add(1, Ordering::AcqRel);
                true
            }
            Some(limit) => self
                .issued
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |issued| {
                    (issued < limit).then_some(issued + 1)
                })
                .is_ok(),
        }
    }

    /// Forces the remaining budget to zero
    pub fn exhaust(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether no further request may be charged
    pub fn is_exhausted(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return true;
        }
        matches!(self.limit, Some(limit) if self.issued() >= limit)
    }

    /// Whether the budget was forced to zero
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Requests charged so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }

    /// Requests still allowed (`None` when unlimited)
    pub fn remaining(&self) -> Option<u64> {
        if self.is_closed() {
            return Some(0);
        }
        self.limit.map(|limit| limit.saturating_sub(self.issued()))
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}
