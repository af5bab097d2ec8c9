//! Offset-based page walker over an owner's posts.

use crate::model::{DateRange, Post};
use crate::store::ArchiveStore;
use anyhow::Result;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: i64 = 1000;

/// Fetch one page. Non-positive page sizes fall back to [`DEFAULT_PAGE_SIZE`],
/// negative offsets are clamped to zero.
pub async fn fetch_page(
    store: &dyn ArchiveStore,
    owner: &str,
    range: Option<&DateRange>,
    page_size: i64,
    offset: i64,
) -> Result<Vec<Post>> {
    store
        .fetch_posts(owner, range, normalize_page_size(page_size), offset.max(0))
        .await
}

pub fn normalize_page_size(page_size: i64) -> i64 {
    if page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    }
}

/// Walks pages in `(created_at DESC, uri ASC)` order until a short page.
pub struct Paginator<'a> {
    store: &'a dyn ArchiveStore,
    owner: &'a str,
    range: Option<&'a DateRange>,
    page_size: i64,
    offset: i64,
    rounds: usize,
    exhausted: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        store: &'a dyn ArchiveStore,
        owner: &'a str,
        range: Option<&'a DateRange>,
        page_size: i64,
    ) -> Self {
        Self {
            store,
            owner,
            range,
            page_size: normalize_page_size(page_size),
            offset: 0,
            rounds: 0,
            exhausted: false,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Number of fetches issued so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Next non-empty page, or `None` once the result set is exhausted.
    /// A page shorter than the page size is returned and marks the end.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Post>>> {
        if self.exhausted {
            return Ok(None);
        }
        let posts = fetch_page(self.store, self.owner, self.range, self.page_size, self.offset)
            .await?;
        self.rounds += 1;
        debug!(offset = self.offset, len = posts.len(), "fetched page");
        if (posts.len() as i64) < self.page_size {
            self.exhausted = true;
        }
        if posts.is_empty() {
            return Ok(None);
        }
        self.offset += posts.len() as i64;
        Ok(Some(posts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExportRecord, Media};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    struct VecStore {
        posts: Vec<Post>,
        calls: Mutex<Vec<(i64, i64)>>,
    }

    impl VecStore {
        fn with_posts(n: usize) -> Self {
            let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let posts = (0..n)
                .map(|i| Post {
                    uri: format!("at://alice/{i:05}"),
                    cid: format!("cid{i}"),
                    author_did: "did:plc:alice".into(),
                    text: String::new(),
                    created_at: ts,
                    indexed_at: ts,
                    like_count: 0,
                    repost_count: 0,
                    reply_count: 0,
                    quote_count: 0,
                    reply_parent: None,
                    reply_root: None,
                    quote_uri: None,
                    has_media: false,
                    embed: None,
                })
                .collect();
            Self {
                posts,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ArchiveStore for VecStore {
        async fn count_posts(&self, _: &str, _: Option<&DateRange>) -> Result<i64> {
            Ok(self.posts.len() as i64)
        }

        async fn fetch_posts(
            &self,
            _: &str,
            _: Option<&DateRange>,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Post>> {
            self.calls.lock().unwrap().push((limit, offset));
            Ok(self
                .posts
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn media_for_post(&self, _: &str) -> Result<Vec<Media>> {
            Ok(Vec::new())
        }

        async fn save_export_record(&self, _: &ExportRecord) -> Result<()> {
            Ok(())
        }

        async fn get_export_record(&self, _: &str) -> Result<Option<ExportRecord>> {
            Ok(None)
        }

        async fn list_export_records(&self, _: &str) -> Result<Vec<ExportRecord>> {
            Ok(Vec::new())
        }

        async fn delete_export_record(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stops_after_short_page() {
        let store = VecStore::with_posts(2500);
        let mut pager = Paginator::new(&store, "did:plc:alice", None, 1000);
        let mut sizes = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            sizes.push(page.len());
        }
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(pager.rounds(), 3);
        assert_eq!(pager.offset(), 2500);
    }

    #[tokio::test]
    async fn exact_multiple_ends_on_empty_page() {
        let store = VecStore::with_posts(20);
        let mut pager = Paginator::new(&store, "did:plc:alice", None, 10);
        let mut total = 0;
        while let Some(page) = pager.next_page().await.unwrap() {
            total += page.len();
        }
        assert_eq!(total, 20);
        assert_eq!(pager.rounds(), 3);
        assert!(pager.next_page().await.unwrap().is_none());
        assert_eq!(pager.rounds(), 3);
    }

    #[tokio::test]
    async fn bad_page_size_and_offset_are_normalized() {
        let store = VecStore::with_posts(5);
        let page = fetch_page(&store, "did:plc:alice", None, 0, -7).await.unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(store.calls.lock().unwrap()[0], (DEFAULT_PAGE_SIZE, 0));

        let mut pager = Paginator::new(&store, "did:plc:alice", None, -3);
        assert_eq!(pager.next_page().await.unwrap().map(|p| p.len()), Some(5));
        assert_eq!(store.calls.lock().unwrap()[1], (DEFAULT_PAGE_SIZE, 0));
        assert_eq!(pager.offset(), 5);
    }
}
