//! Cross-query deduplication
//!
//! One seen-set is shared by every query of a crawl. The key depends on the
//! crawl mode: the post URI in posts mode, the author DID in users mode.

use crate::api::RawPost;
use crate::config::CrawlMode;
use std::collections::HashSet;
use std::sync::Mutex;

/// Result of filtering one page
#[derive(Debug)]
pub struct Filtered<T, E> {
    /// Records converted from unseen items, in page order
    pub admitted: Vec<T>,
    /// Conversion failures; their keys stay unseen
    pub rejected: Vec<E>,
    /// Items dropped because their key was already emitted
    pub duplicates: usize,
}

/// Thread-safe seen-set
#[derive(Debug)]
pub struct Deduplicator {
    mode: CrawlMode,
    seen: Mutex<HashSet<String>>,
}

/// Identifier an item is deduplicated on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey<'a> {
    /// AT URI of the post (posts mode)
    Post(&'a str),
    /// DID of the post's author (users mode)
    Author(&'a str),
}

impl<'a> DedupKey<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            DedupKey::Post(uri) => uri,
            DedupKey::Author(did) => did,
        }
    }
}

/// Key an item is deduplicated on, if it carries one
pub fn dedup_key(item: &RawPost, mode: CrawlMode) -> Option<DedupKey<'_>> {
    match mode {
        CrawlMode::Posts => item.uri.as_deref().map(DedupKey::Post),
        CrawlMode::Users => item.author.as_ref()?.did.as_deref().map(DedupKey::Author),
    }
}

impl Deduplicator {
    pub fn new(mode: CrawlMode) -> Self {
        Self {
            mode,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Converts the items whose key has not been emitted and marks them seen
    ///
    /// Membership test, conversion and insertion happen under one lock, so
    /// two workers can never both admit the same key. A key is only marked
    /// seen once its item converted, so an item that fails `convert` does
    /// not hide a later valid item with the same key. Repeats within the
    /// page are dropped too. Items without a key are still handed to
    /// `convert`, which is expected to reject them.
    pub fn filter_new<T, E>(
        &self,
        items: &[RawPost],
        mut convert: impl FnMut(&RawPost) -> Result<T, E>,
    ) -> Filtered<T, E> {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut filtered = Filtered {
            admitted: Vec::new(),
            rejected: Vec::new(),
            duplicates: 0,
        };
        for item in items {
            let key = dedup_key(item, self.mode);
            if key.is_some_and(|key| seen.contains(key.as_str())) {
                filtered.duplicates += 1;
                continue;
            }

            match convert(item) {
                Ok(record) => {
                    if let Some(key) = key {
                        seen.insert(key.as_str().to_string());
                    }
                    filtered.admitted.push(record);
                }
                Err(e) => filtered.rejected.push(e),
            }
        }
        filtered
    }

    /// Number of distinct keys seen
    pub fn len(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
