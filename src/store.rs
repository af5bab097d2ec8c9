//! Boundary to the archive: everything the exporter reads from or persists to
//! storage goes through [`ArchiveStore`].

use crate::db::{self, Pool};
use crate::model::{DateRange, ExportRecord, Media, Post};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn count_posts(&self, owner: &str, range: Option<&DateRange>) -> Result<i64>;

    /// Posts ordered by `(created_at DESC, uri ASC)`, at most `limit` of them.
    async fn fetch_posts(
        &self,
        owner: &str,
        range: Option<&DateRange>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Post>>;

    async fn media_for_post(&self, post_uri: &str) -> Result<Vec<Media>>;

    async fn save_export_record(&self, record: &ExportRecord) -> Result<()>;

    async fn get_export_record(&self, id: &str) -> Result<Option<ExportRecord>>;

    /// Records owned by `owner`, newest first.
    async fn list_export_records(&self, owner: &str) -> Result<Vec<ExportRecord>>;

    async fn delete_export_record(&self, id: &str) -> Result<()>;
}

/// SQLite-backed archive.
#[derive(Clone)]
pub struct SqliteArchive {
    pool: Pool,
}

impl fmt::Debug for SqliteArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteArchive").finish_non_exhaustive()
    }
}

impl SqliteArchive {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArchiveStore for SqliteArchive {
    async fn count_posts(&self, owner: &str, range: Option<&DateRange>) -> Result<i64> {
        db::count_posts(&self.pool, owner, range).await
    }

    async fn fetch_posts(
        &self,
        owner: &str,
        range: Option<&DateRange>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Post>> {
        db::fetch_posts_page(&self.pool, owner, range, limit, offset).await
    }

    async fn media_for_post(&self, post_uri: &str) -> Result<Vec<Media>> {
        db::media_for_post(&self.pool, post_uri).await
    }

    async fn save_export_record(&self, record: &ExportRecord) -> Result<()> {
        db::insert_export_record(&self.pool, record).await
    }

    async fn get_export_record(&self, id: &str) -> Result<Option<ExportRecord>> {
        db::get_export_record(&self.pool, id).await
    }

    async fn list_export_records(&self, owner: &str) -> Result<Vec<ExportRecord>> {
        db::list_export_records(&self.pool, owner).await
    }

    async fn delete_export_record(&self, id: &str) -> Result<()> {
        db::delete_export_record(&self.pool, id).await
    }
}
