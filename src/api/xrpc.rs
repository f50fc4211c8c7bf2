//! XRPC implementation of the search API
//!
//! Handles:
//! - Session creation and deletion
//! - Post search with cursor pagination
//! - Profile lookups
//! - Classification of HTTP failures into [`ApiError`]

use crate::api::types::{
    Credential, RawProfile, SearchPage, SearchPostsResponse, SearchRequest, SessionResponse,
    XrpcErrorBody,
};
use crate::api::{ApiError, ApiResult, SearchApi};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

const CREATE_SESSION: &str = "com.atproto.server.createSession";
const DELETE_SESSION: &str = "com.atproto.server.deleteSession";
const SEARCH_POSTS: &str = "app.bsky.feed.searchPosts";
const GET_PROFILE: &str = "app.bsky.actor.getProfile";

/// Builds the HTTP client used for all API calls
///
/// Every request made through the client is bounded by `timeout`.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("bluesky-crawler/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Search API client speaking XRPC over HTTP
#[derive(Debug, Clone)]
pub struct XrpcClient {
    client: Client,
    service_url: String,
}

impl XrpcClient {
    /// Creates a client for the given entryway service
    ///
    /// # Arguments
    ///
    /// * `service_url` - Base URL used for session creation, e.g. `https://bsky.social`
    /// * `timeout` - Timeout applied to every request
    pub fn new(service_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(timeout)?,
            service_url: service_url.trim_end_matches('/').to_string(),
        })
    }

    /// Builds `<base>/xrpc/<nsid>`
    fn endpoint(base: &str, nsid: &str) -> ApiResult<Url> {
        let mut url = Url::parse(base)?;
        url.set_path(&format!("/xrpc/{}", nsid));
        Ok(url)
    }
}

#[async_trait]
impl SearchApi for XrpcClient {
    async fn authenticate(&self, identifier: &str, password: &str) -> ApiResult<Credential> {
        let url = Self::endpoint(&self.service_url, CREATE_SESSION)?;
        let body = serde_json::json!({ "identifier": identifier, "password": password });

        let response = self.client.post(url).json(&body).send().await?;
        let session: SessionResponse = read_json(check_status(response).await?).await?;

        let endpoint = session
            .pds_endpoint()
            .map(str::to_string)
            .unwrap_or_else(|| self.service_url.clone());

        tracing::debug!(did = %session.did, endpoint = %endpoint, "Session created");

        Ok(Credential {
            access_jwt: session.access_jwt,
            refresh_jwt: session.refresh_jwt,
            did: session.did,
            handle: session.handle,
            endpoint,
        })
    }

    async fn search(
        &self,
        credential: &Credential,
        request: &SearchRequest<'_>,
    ) -> ApiResult<SearchPage> {
        let mut url = Self::endpoint(&credential.endpoint, SEARCH_POSTS)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", request.query);
            pairs.append_pair("limit", &request.limit.to_string());
            if let Some(cursor) = request.cursor {
                pairs.append_pair("cursor", cursor);
            }
            if let Some(sort) = request.sort {
                pairs.append_pair("sort", sort.as_str());
            }
        }

        let response = self
            .client
            .get(url)
            .bearer_auth(&credential.access_jwt)
            .send()
            .await?;
        let body: SearchPostsResponse = read_json(check_status(response).await?).await?;

        let posts = body
            .posts
            .ok_or_else(|| ApiError::Malformed("response has no posts field".to_string()))?;

        Ok(SearchPage {
            posts,
            cursor: body.cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn get_profile(&self, credential: &Credential, actor: &str) -> ApiResult<RawProfile> {
        let mut url = Self::endpoint(&credential.endpoint, GET_PROFILE)?;
        url.query_pairs_mut().append_pair("actor", actor);

        let response = self
            .client
            .get(url)
            .bearer_auth(&credential.access_jwt)
            .send()
            .await?;
        read_json(check_status(response).await?).await
    }

    async fn close_session(&self, credential: &Credential) -> ApiResult<()> {
        let url = Self::endpoint(&credential.endpoint, DELETE_SESSION)?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&credential.refresh_jwt)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Maps a non-success response to the matching [`ApiError`]
///
/// | Condition | Error |
/// |-----------|-------|
/// | HTTP 429 | `RateLimited` |
/// | HTTP 401, or 400 with `ExpiredToken`/`InvalidToken` | `Unauthorized` |
/// | HTTP 5xx | `Server` |
/// | Other 4xx | `Rejected` |
async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::RateLimited {
            retry_after: retry_after(response.headers(), chrono::Utc::now().timestamp()),
        });
    }

    let text = response.text().await.unwrap_or_default();
    let body: XrpcErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body.message.unwrap_or(text);
    let code = status.as_u16();

    let token_error = matches!(body.error.as_deref(), Some("ExpiredToken" | "InvalidToken"));
    if status == StatusCode::UNAUTHORIZED || (status == StatusCode::BAD_REQUEST && token_error) {
        return Err(ApiError::Unauthorized {
            status: code,
            message,
        });
    }

    if status.is_server_error() {
        return Err(ApiError::Server {
            status: code,
            message,
        });
    }

    Err(ApiError::Rejected {
        status: code,
        message,
    })
}

/// Reads a JSON body, reporting undecodable content as malformed
async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Extracts the server's retry hint
///
/// `Retry-After` (seconds) wins; otherwise `ratelimit-reset` is read as a
/// Unix timestamp relative to `now`.
fn retry_after(headers: &HeaderMap, now: i64) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(seconds) = header("retry-after") {
        return Some(Duration::from_secs(seconds.max(0) as u64));
    }

    header("ratelimit-reset").map(|reset| Duration::from_secs((reset - now).max(0) as u64))
}
