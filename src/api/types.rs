//! Wire types for the XRPC endpoints used by the crawler
//!
//! Post fields are optional so that an incomplete item is reported by the
//! extractor instead of failing the whole page.

use crate::config::SearchSort;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authenticated credential returned by session creation
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub did: String,
    pub handle: String,
    /// Base URL that serves requests for this session
    pub endpoint: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// `com.atproto.server.createSession` response body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
    #[serde(default)]
    pub did_doc: Option<DidDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DidDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub service: Vec<DidService>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidService {
    #[serde(default)]
    pub id: Option<String>,
    pub service_endpoint: String,
}

impl SessionResponse {
    /// Personal data server advertised by the DID document, if any
    pub fn pds_endpoint(&self) -> Option<&str> {
        let services = &self.did_doc.as_ref()?.service;
        services
            .iter()
            .find(|s| s.id.as_deref().is_some_and(|id| id.ends_with("#atproto_pds")))
            .or_else(|| services.first())
            .map(|s| s.service_endpoint.trim_end_matches('/'))
    }
}

/// Parameters of one search request
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub cursor: Option<&'a str>,
    pub limit: u32,
    pub sort: Option<SearchSort>,
}

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub posts: Vec<RawPost>,
    pub cursor: Option<String>,
}

/// `app.bsky.feed.searchPosts` response body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPostsResponse {
    #[serde(default)]
    pub posts: Option<Vec<RawPost>>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// A post view as returned by search, before normalization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPost {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub author: Option<RawAuthor>,
    #[serde(default)]
    pub record: Option<RawPostRecord>,
    #[serde(default)]
    pub indexed_at: Option<String>,
    #[serde(default)]
    pub reply_count: Option<u64>,
    #[serde(default)]
    pub repost_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub quote_count: Option<u64>,
}

/// Author sub-object of a post view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuthor {
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub followers_count: Option<u64>,
}

/// The `app.bsky.feed.post` record embedded in a post view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPostRecord {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub langs: Vec<String>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyRef {
    #[serde(default)]
    pub parent: Option<StrongRef>,
    #[serde(default)]
    pub root: Option<StrongRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrongRef {
    #[serde(default)]
    pub uri: Option<String>,
}

/// `app.bsky.actor.getProfile` response body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProfile {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub indexed_at: Option<String>,
    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub follows_count: Option<u64>,
    #[serde(default)]
    pub posts_count: Option<u64>,
}

/// XRPC error body
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct XrpcErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
