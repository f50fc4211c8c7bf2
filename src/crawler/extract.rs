//! Record extraction
//!
//! Turns raw search items into normalized records for the crawl mode.
//! Missing engagement counters default to zero; missing identity or content
//! fields make the item malformed.

use crate::api::{RawPost, RawProfile};
use crate::config::CrawlMode;
use crate::output::{NormalizedRecord, PostMetrics, PostRecord, UserRecord};
use thiserror::Error;

/// An item lacking a field its mode requires
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("item {id} is missing required field `{field}`")]
pub struct MalformedRecord {
    /// Best identifier available for the log line
    pub id: String,
    pub field: &'static str,
}

/// Extracts records of one mode
#[derive(Debug, Clone, Copy)]
pub struct RecordExtractor {
    mode: CrawlMode,
}

impl RecordExtractor {
    pub fn new(mode: CrawlMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CrawlMode {
        self.mode
    }

    pub fn extract(&self, raw: &RawPost) -> Result<NormalizedRecord, MalformedRecord> {
        match self.mode {
            CrawlMode::Posts => extract_post(raw).map(NormalizedRecord::Post),
            CrawlMode::Users => extract_user(raw).map(NormalizedRecord::User),
        }
    }
}

fn describe(raw: &RawPost) -> String {
    raw.uri
        .clone()
        .or_else(|| raw.author.as_ref().and_then(|a| a.did.clone()))
        .unwrap_or_else(|| "<unidentified>".to_string())
}

fn require<T>(value: Option<T>, raw: &RawPost, field: &'static str) -> Result<T, MalformedRecord> {
    value.ok_or_else(|| MalformedRecord {
        id: describe(raw),
        field,
    })
}

fn extract_post(raw: &RawPost) -> Result<PostRecord, MalformedRecord> {
    let uri = require(raw.uri.clone(), raw, "uri")?;
    let cid = require(raw.cid.clone(), raw, "cid")?;
    let author = require(raw.author.as_ref(), raw, "author")?;
    let author_did = require(author.did.clone(), raw, "author.did")?;
    let record = require(raw.record.as_ref(), raw, "record")?;
    let text = require(record.text.clone(), raw, "record.text")?;
    let created_at = require(record.created_at.clone(), raw, "record.createdAt")?;

    let reply = record.reply.as_ref();
    let reply_uri = |pick: fn(&crate::api::ReplyRef) -> Option<&crate::api::StrongRef>| {
        reply.and_then(pick).and_then(|r| r.uri.clone())
    };

    Ok(PostRecord {
        uri,
        cid,
        author_did,
        author_handle: author.handle.clone(),
        text,
        created_at,
        indexed_at: raw.indexed_at.clone(),
        metrics: PostMetrics {
            reply_count: raw.reply_count.unwrap_or(0),
            repost_count: raw.repost_count.unwrap_or(0),
            like_count: raw.like_count.unwrap_or(0),
            quote_count: raw.quote_count.unwrap_or(0),
        },
        langs: record.langs.clone(),
        reply_parent: reply_uri(|r| r.parent.as_ref()),
        reply_root: reply_uri(|r| r.root.as_ref()),
    })
}

fn extract_user(raw: &RawPost) -> Result<UserRecord, MalformedRecord> {
    let author = require(raw.author.as_ref(), raw, "author")?;
    let did = require(author.did.clone(), raw, "author.did")?;
    let handle = require(author.handle.clone(), raw, "author.handle")?;

    Ok(UserRecord {
        did,
        handle,
        display_name: author.display_name.clone(),
        followers_count: author.followers_count,
        avatar: author.avatar.clone(),
        description: None,
        created_at: author.created_at.clone(),
        indexed_at: None,
        posts_count: None,
        follows_count: None,
    })
}

/// Overlays a fetched profile onto a user record
///
/// Profile values win; fields the profile leaves empty keep what the post's
/// author view provided.
pub fn merge_profile(user: &mut UserRecord, profile: RawProfile) {
    user.handle = profile.handle;
    user.display_name = profile.display_name.or(user.display_name.take());
    user.followers_count = profile.followers_count.or(user.followers_count);
    user.avatar = profile.avatar.or(user.avatar.take());
    user.description = profile.description.or(user.description.take());
    user.created_at = profile.created_at.or(user.created_at.take());
    user.indexed_at = profile.indexed_at.or(user.indexed_at.take());
    user.posts_count = profile.posts_count.or(user.posts_count);
    user.follows_count = profile.follows_count.or(user.follows_count);
}
