//! Retry policy for page fetches and session creation
//!
//! | Condition | Verdict |
//! |-----------|---------|
//! | Rate limited | Retry, honoring the server hint |
//! | Timeout, network error, HTTP 5xx | Retry with exponential backoff |
//! | Request rejected (other 4xx) | Skip the query |
//! | Session refused after re-authentication | Fatal |

use crate::config::RetryConfig;
use crate::crawler::fetcher::FetchError;
use std::time::Duration;

/// What to do about a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Try again after the given delay
    Retryable(Duration),

    /// Give up on this query, keep crawling the others
    SkipQuery,

    /// Abort the whole crawl
    Fatal,
}

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Attempts allowed per fetch, first attempt included
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (0-based), capped at the ceiling
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay honoring a server hint, never beyond the ceiling
    pub fn backoff_with_hint(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let computed = self.backoff(retry);
        match hint {
            Some(hint) => hint.max(computed).min(self.max_backoff),
            None => computed,
        }
    }

    /// Classifies a fetch failure
    ///
    /// `retry` is the number of retries already made for this fetch. The
    /// single transparent retry after a session expiry is handled by the
    /// caller; an expiry that reaches this point is fatal.
    pub fn classify(&self, error: &FetchError, retry: u32) -> Verdict {
        match error {
            FetchError::RateLimited { retry_after } => {
                Verdict::Retryable(self.backoff_with_hint(retry, *retry_after))
            }
            FetchError::Timeout | FetchError::Network(_) | FetchError::Server { .. } => {
                Verdict::Retryable(self.backoff(retry))
            }
            FetchError::Rejected { .. } => Verdict::SkipQuery,
            FetchError::AuthExpired => Verdict::Fatal,
        }
    }

    /// Whether another attempt fits after `retry` retries
    pub fn can_retry(&self, retry: u32) -> bool {
        retry + 1 < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
