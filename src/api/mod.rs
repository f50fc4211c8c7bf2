//! Search API capability
//!
//! The crawl engine talks to the social network only through [`SearchApi`].
//! [`XrpcClient`] implements it against the AT Protocol XRPC endpoints.

mod types;
mod xrpc;

pub use types::{
    Credential, DidDocument, DidService, RawAuthor, RawPost, RawPostRecord, RawProfile, ReplyRef,
    SearchPage, SearchPostsResponse, SearchRequest, SessionResponse, StrongRef,
};
pub use xrpc::{build_http_client, XrpcClient};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the search API
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credential rejected or access token expired
    #[error("Unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// Request refused for a reason retrying will not fix
    #[error("Request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Malformed(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Malformed(err.to_string())
    }
}

/// Black-box access to the social network
///
/// Implementations must apply a timeout to every call.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Creates a session from an identifier and app password
    async fn authenticate(&self, identifier: &str, password: &str) -> ApiResult<Credential>;

    /// Fetches one page of post search results
    async fn search(
        &self,
        credential: &Credential,
        request: &SearchRequest<'_>,
    ) -> ApiResult<SearchPage>;

    /// Fetches the full profile of an account
    async fn get_profile(&self, credential: &Credential, actor: &str) -> ApiResult<RawProfile>;

    /// Deletes the session behind a credential
    async fn close_session(&self, credential: &Credential) -> ApiResult<()>;
}
