#![allow(dead_code)]

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use skyvault::export::{ExportHandle, ExportSettings, Exporter};
use skyvault::model::{DateRange, ExportFormat, ExportOptions, ExportProgress, ExportRecord, Media, Post};
use skyvault::store::ArchiveStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// In-memory archive that counts fetch rounds and can fail or stall on demand.
#[derive(Default)]
pub struct MemoryArchive {
    posts: Mutex<Vec<Post>>,
    media: Mutex<HashMap<String, Vec<Media>>>,
    records: Mutex<HashMap<String, ExportRecord>>,
    fetches: AtomicUsize,
    fail_fetch_at: Option<usize>,
    fail_record_save: bool,
    fail_record_delete: bool,
    gate: Option<Arc<Semaphore>>,
}

impl MemoryArchive {
    pub fn with_posts(posts: Vec<Post>) -> Self {
        Self {
            posts: Mutex::new(posts),
            ..Default::default()
        }
    }

    /// Fail the `n`th fetch (1-based).
    pub fn failing_fetch_at(mut self, n: usize) -> Self {
        self.fail_fetch_at = Some(n);
        self
    }

    pub fn failing_record_save(mut self) -> Self {
        self.fail_record_save = true;
        self
    }

    pub fn failing_record_delete(mut self) -> Self {
        self.fail_record_delete = true;
        self
    }

    /// Every fetch waits until the returned semaphore gets permits.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn add_media(&self, media: Media) {
        self.media
            .lock()
            .unwrap()
            .entry(media.post_uri.clone())
            .or_default()
            .push(media);
    }

    pub fn fetch_rounds(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Posts of `owner` in export order.
    pub fn ordered(&self, owner: &str, range: Option<&DateRange>) -> Vec<Post> {
        let mut posts: Vec<Post> = self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.author_did == owner)
            .filter(|p| range.map_or(true, |r| r.contains(p.created_at)))
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.uri.cmp(&b.uri)));
        posts
    }
}

#[async_trait::async_trait]
impl ArchiveStore for MemoryArchive {
    async fn count_posts(&self, owner: &str, range: Option<&DateRange>) -> Result<i64> {
        Ok(self.ordered(owner, range).len() as i64)
    }

    async fn fetch_posts(
        &self,
        owner: &str,
        range: Option<&DateRange>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Post>> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|e| anyhow!(e))?;
        }
        let round = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_fetch_at == Some(round) {
            return Err(anyhow!("disk I/O error on fetch {}", round));
        }
        Ok(self
            .ordered(owner, range)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn media_for_post(&self, post_uri: &str) -> Result<Vec<Media>> {
        Ok(self
            .media
            .lock()
            .unwrap()
            .get(post_uri)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_export_record(&self, record: &ExportRecord) -> Result<()> {
        if self.fail_record_save {
            return Err(anyhow!("record table is read-only"));
        }
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_export_record(&self, id: &str) -> Result<Option<ExportRecord>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn list_export_records(&self, owner: &str) -> Result<Vec<ExportRecord>> {
        let mut out: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }

    async fn delete_export_record(&self, id: &str) -> Result<()> {
        if self.fail_record_delete {
            return Err(anyhow!("database is locked"));
        }
        self.records.lock().unwrap().remove(id);
        Ok(())
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// `n` posts for `owner`; every 5 posts share one timestamp.
pub fn make_posts(owner: &str, n: usize) -> Vec<Post> {
    (0..n)
        .map(|i| make_post(owner, i, base_time() - Duration::minutes((i / 5) as i64)))
        .collect()
}

pub fn make_post(owner: &str, i: usize, created_at: DateTime<Utc>) -> Post {
    Post {
        uri: format!("at://{owner}/app.bsky.feed.post/{i:06}"),
        cid: format!("bafypost{i}"),
        author_did: owner.to_string(),
        text: format!("post {i}"),
        created_at,
        indexed_at: created_at + Duration::seconds(3),
        like_count: (i % 7) as i64,
        repost_count: (i % 3) as i64,
        reply_count: 0,
        quote_count: 0,
        reply_parent: None,
        reply_root: None,
        quote_uri: None,
        has_media: false,
        embed: None,
    }
}

pub fn image_embed(cids: &[&str]) -> serde_json::Value {
    let images: Vec<_> = cids
        .iter()
        .map(|c| json!({"alt": "", "image": {"$type": "blob", "ref": {"$link": c}, "mimeType": "image/jpeg"}}))
        .collect();
    json!({"$type": "app.bsky.embed.images", "images": images})
}

pub fn settings(page_size: i64) -> ExportSettings {
    ExportSettings {
        page_size,
        min_free_bytes: 0,
        progress_buffer: 4096,
        final_send_timeout: std::time::Duration::from_secs(30),
    }
}

pub fn options(owner: &str, format: ExportFormat, root: &Path) -> ExportOptions {
    ExportOptions {
        format,
        owner: owner.to_string(),
        include_media: false,
        date_range: None,
        output_root: root.to_path_buf(),
    }
}

pub fn exporter(store: Arc<MemoryArchive>, page_size: i64) -> Exporter {
    Exporter::new(store, settings(page_size))
}

/// Collect every snapshot until the job closes its update stream.
pub async fn drain(mut handle: ExportHandle) -> Vec<ExportProgress> {
    let mut seen = Vec::new();
    let res = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        while let Some(p) = handle.updates.recv().await {
            seen.push(p);
        }
    })
    .await;
    assert!(res.is_ok(), "export did not finish in time");
    seen
}

/// Minimal RFC 4180 reader used to check what spreadsheet tools would see.
pub fn parse_csv(input: &str) -> Vec<Vec<String>> {
    let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Names of the entries directly inside `dir`, sorted.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
