//! Page fetcher
//!
//! Issues one search request per call and interprets the result:
//! - Successful pages yield their items and the next cursor
//! - Malformed pages yield no items and the exhaustion sentinel
//! - Failures are mapped to [`FetchError`] for the retry policy

use crate::api::{ApiError, RawPost, SearchApi, SearchRequest};
use crate::config::SearchSort;
use crate::crawler::session::Session;
use crate::state::Cursor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single page fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// The session's access token was refused
    #[error("session expired")]
    AuthExpired,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The API refused the request itself (bad query, unknown parameter)
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<ApiError> for FetchError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { .. } => FetchError::AuthExpired,
            ApiError::RateLimited { retry_after } => FetchError::RateLimited { retry_after },
            ApiError::Timeout => FetchError::Timeout,
            ApiError::Network(message) => FetchError::Network(message),
            ApiError::Server { status, message } => FetchError::Server { status, message },
            ApiError::Rejected { status, message } => FetchError::Rejected { status, message },
            ApiError::Malformed(message) => FetchError::Rejected { status: 200, message },
            ApiError::Url(e) => FetchError::Rejected {
                status: 0,
                message: e.to_string(),
            },
        }
    }
}

/// One fetched page
#[derive(Debug, Clone)]
pub struct Page {
    /// Items in the order the API returned them
    pub items: Vec<RawPost>,
    pub next_cursor: Cursor,
}

impl Page {
    fn exhausted() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: Cursor::Exhausted,
        }
    }
}

/// Fetches search result pages
pub struct PageFetcher {
    api: Arc<dyn SearchApi>,
    page_size: u32,
    sort: Option<SearchSort>,
}

impl PageFetcher {
    pub fn new(api: Arc<dyn SearchApi>, page_size: u32, sort: Option<SearchSort>) -> Self {
        Self {
            api,
            page_size,
            sort,
        }
    }

    /// Fetches the page of `query` that starts at `cursor`
    ///
    /// Calls the search API exactly once.
    ///
    /// # Returns
    ///
    /// * `Ok(Page)` - The page; malformed responses become an empty, exhausted page
    /// * `Err(FetchError)` - The request failed
    pub async fn fetch(
        &self,
        session: &Session,
        query: &str,
        cursor: &Cursor,
    ) -> Result<Page, FetchError> {
        let request = SearchRequest {
            query,
            cursor: cursor.as_param(),
            limit: self.page_size,
            sort: self.sort,
        };

        match self.api.search(session.credential(), &request).await {
            Ok(page) => Ok(Page {
                items: page.posts,
                next_cursor: Cursor::from_response(page.cursor),
            }),
            Err(ApiError::Malformed(message)) => {
                tracing::warn!(query, "Malformed search page, ending query: {}", message);
                Ok(Page::exhausted())
            }
            Err(e) => Err(e.into()),
        }
    }
}
