//! Normalized output records
//!
//! Field names of the serialized form match the dataset layout the crawler
//! has always produced (`created`, `indexed`, `author_did`, ...).

use crate::config::CrawlMode;
use serde::Serialize;

/// Engagement counters of a post
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostMetrics {
    pub reply_count: u64,
    pub repost_count: u64,
    pub like_count: u64,
    pub quote_count: u64,
}

/// A post matching one of the queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRecord {
    /// AT URI of the post, its stable identifier
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub author_handle: Option<String>,
    pub text: String,
    #[serde(rename = "created")]
    pub created_at: String,
    #[serde(rename = "indexed")]
    pub indexed_at: Option<String>,
    #[serde(flatten)]
    pub metrics: PostMetrics,
    pub langs: Vec<String>,
    pub reply_parent: Option<String>,
    pub reply_root: Option<String>,
}

/// An author who posted on one of the queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    /// DID of the account, its stable identifier
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub followers_count: Option<u64>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "created")]
    pub created_at: Option<String>,
    #[serde(rename = "indexed")]
    pub indexed_at: Option<String>,
    pub posts_count: Option<u64>,
    pub follows_count: Option<u64>,
}

/// Output unit of a crawl; the variant always matches the crawl mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedRecord {
    Post(PostRecord),
    User(UserRecord),
}

impl NormalizedRecord {
    /// Identifier used for deduplication
    pub fn id(&self) -> &str {
        match self {
            NormalizedRecord::Post(post) => &post.uri,
            NormalizedRecord::User(user) => &user.did,
        }
    }

    pub fn mode(&self) -> CrawlMode {
        match self {
            NormalizedRecord::Post(_) => CrawlMode::Posts,
            NormalizedRecord::User(_) => CrawlMode::Users,
        }
    }
}
