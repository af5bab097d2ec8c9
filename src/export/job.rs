//! Export orchestrator: runs one job from `Running` to `Completed` or `Failed`.
//!
//! Work inside a job is strictly sequential. The bundle directory belongs to the
//! job until its `ExportRecord` is saved; any error before that point removes
//! the directory again.

use super::encode::PostEncoder;
use super::manifest::{self, MEDIA_DIR};
use super::media::{self, MediaCopyPlan};
use super::paginate::Paginator;
use super::registry::JobRegistry;
use super::{ExportError, ExportSettings};
use crate::model::{ExportOptions, ExportProgress, ExportStatus};
use crate::store::ArchiveStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

const MAX_DIR_SUFFIX: u32 = 1000;

pub const EMPTY_EXPORT_MESSAGE: &str = "No posts matched the export filters; the bundle only contains a manifest and an empty posts file.";

/// Pushes snapshots to the registry and, best-effort, to the update channel.
#[derive(Clone)]
pub(crate) struct Publisher {
    registry: JobRegistry,
    job_id: String,
    updates: mpsc::Sender<ExportProgress>,
    final_send_timeout: Duration,
}

impl Publisher {
    pub(crate) fn new(
        registry: JobRegistry,
        job_id: String,
        updates: mpsc::Sender<ExportProgress>,
        final_send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            job_id,
            updates,
            final_send_timeout,
        }
    }

    /// Intermediate snapshot. Dropped from the channel when the consumer lags.
    fn publish(&self, progress: &ExportProgress) {
        self.registry
            .update(&self.job_id, |job| job.progress = progress.clone());
        let _ = self.updates.try_send(progress.clone());
    }

    /// Terminal snapshot. Always recorded in the registry, then awaited on the
    /// channel so a live consumer sees it before the stream closes. A receiver
    /// that stays full past `final_send_timeout` loses it.
    async fn publish_final(&self, progress: &ExportProgress) {
        self.registry.update(&self.job_id, |job| {
            job.progress = progress.clone();
            job.completed_at = Some(Utc::now());
        });
        let send = self.updates.send(progress.clone());
        if tokio::time::timeout(self.final_send_timeout, send).await.is_err() {
            warn!(job_id = %self.job_id, "update receiver not draining; final snapshot left in registry only");
        }
    }

    fn set_export_dir(&self, dir: Option<PathBuf>) {
        self.registry.update(&self.job_id, |job| job.export_dir = dir);
    }
}

pub(crate) struct ExportRun {
    store: Arc<dyn ArchiveStore>,
    settings: ExportSettings,
    options: ExportOptions,
    job_id: String,
    started_at: DateTime<Utc>,
    publisher: Publisher,
    progress: ExportProgress,
}

impl ExportRun {
    pub(crate) fn new(
        store: Arc<dyn ArchiveStore>,
        settings: ExportSettings,
        options: ExportOptions,
        job_id: String,
        started_at: DateTime<Utc>,
        publisher: Publisher,
    ) -> Self {
        Self {
            store,
            settings,
            options,
            job_id,
            started_at,
            publisher,
            progress: ExportProgress::default(),
        }
    }

    #[instrument(skip_all, fields(job_id = %self.job_id, owner = %self.options.owner))]
    pub(crate) async fn run(mut self) {
        self.progress.status = ExportStatus::Running;
        self.publisher.publish(&self.progress);
        info!(format = %self.options.format, include_media = self.options.include_media, "export started");

        let mut export_dir = None;
        match self.execute(&mut export_dir).await {
            Ok(()) => {
                self.progress.status = ExportStatus::Completed;
                info!(
                    posts = self.progress.posts_processed,
                    media = self.progress.media_copied,
                    "export completed"
                );
            }
            Err(err) => {
                let message = format!("{:#}", err);
                error!(error = %message, "export failed");
                self.progress.status = ExportStatus::Failed;
                self.progress.error = Some(message);
                if let Some(dir) = export_dir.take() {
                    remove_bundle(&dir).await;
                }
                self.publisher.set_export_dir(None);
            }
        }
        self.publisher.publish_final(&self.progress).await;
    }

    async fn execute(&mut self, export_dir: &mut Option<PathBuf>) -> Result<()> {
        let dir = create_export_dir(
            &self.options.output_root,
            &self.options.owner,
            self.started_at,
        )
        .await?;
        *export_dir = Some(dir.clone());
        self.publisher.set_export_dir(Some(dir.clone()));

        ensure_free_space(&dir, self.settings.min_free_bytes)?;

        if self.options.include_media {
            let media_dir = dir.join(MEDIA_DIR);
            fs::create_dir_all(&media_dir)
                .await
                .with_context(|| format!("failed to create {}", media_dir.display()))?;
        }

        let total = self
            .store
            .count_posts(&self.options.owner, self.options.filter())
            .await
            .context("failed to count posts")?;
        self.progress.posts_total = u64::try_from(total).unwrap_or(0);
        if self.progress.posts_total == 0 {
            self.progress.message = Some(EMPTY_EXPORT_MESSAGE.to_string());
        }
        self.publisher.publish(&self.progress);

        self.write_posts(&dir).await?;

        if self.options.include_media {
            self.copy_media(&dir).await?;
        }

        let manifest = manifest::build_manifest(
            &self.options,
            Utc::now(),
            self.progress.posts_processed,
            self.progress.media_copied,
        );
        let manifest_path = manifest::write_manifest(&dir, &manifest).await?;

        let size_dir = dir.clone();
        let size = tokio::task::spawn_blocking(move || manifest::bundle_size(&size_dir))
            .await
            .context("bundle size task panicked")??;

        let record = manifest::build_record(&self.options, &dir, &manifest, &manifest_path, size);
        self.store
            .save_export_record(&record)
            .await
            .context("failed to save export record")?;
        info!(record_id = %record.id, size_bytes = size, "export record saved");
        Ok(())
    }

    async fn write_posts(&mut self, dir: &Path) -> Result<()> {
        let path = dir.join(self.options.format.data_file_name());
        let file = File::create(&path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut encoder = PostEncoder::new(self.options.format, BufWriter::new(file));

        if self.progress.posts_total > 0 {
            let mut pager = Paginator::new(
                self.store.as_ref(),
                &self.options.owner,
                self.options.filter(),
                self.settings.page_size,
            );
            while let Some(page) = pager
                .next_page()
                .await
                .with_context(|| format!("failed to fetch posts at offset {}", pager.offset()))?
            {
                encoder
                    .write_page(&page)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                self.progress.posts_processed += page.len() as u64;
                self.publisher.publish(&self.progress);
            }
            debug!(rounds = pager.rounds(), "posts written");
        }

        let mut out = encoder.finish().await?;
        out.flush().await?;
        out.into_inner()
            .sync_all()
            .await
            .with_context(|| format!("failed to sync {}", path.display()))?;
        Ok(())
    }

    async fn copy_media(&mut self, dir: &Path) -> Result<()> {
        let mut plan = MediaCopyPlan::new(dir.join(MEDIA_DIR));
        let mut pager = Paginator::new(
            self.store.as_ref(),
            &self.options.owner,
            self.options.filter(),
            self.settings.page_size,
        );
        while let Some(page) = pager.next_page().await.context("failed to re-read posts")? {
            for post in page.iter().filter(|p| p.has_media) {
                let media = self
                    .store
                    .media_for_post(&post.uri)
                    .await
                    .with_context(|| format!("failed to look up media for {}", post.uri))?;
                for m in &media {
                    plan.add(m);
                }
            }
        }

        self.progress.media_total = plan.len() as u64;
        self.publisher.publish(&self.progress);
        if plan.is_empty() {
            debug!("no media referenced");
            return Ok(());
        }

        let publisher = self.publisher.clone();
        let mut snapshot = self.progress.clone();
        let copied = media::copy_media(&plan, move |n| {
            snapshot.media_copied = n;
            publisher.publish(&snapshot);
        })
        .await;

        self.progress.media_copied = copied;
        self.publisher.publish(&self.progress);
        Ok(())
    }
}

/// Path-safe form of an owner id for use as a directory name.
pub fn owner_dir_name(owner: &str) -> String {
    let cleaned: String = owner
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

/// Create `<root>/<owner>/<YYYY-MM-DD_HH-MM-SS>`; a bundle started in the same
/// second gets a `-2`, `-3`, ... suffix instead of reusing the directory.
pub async fn create_export_dir(root: &Path, owner: &str, at: DateTime<Utc>) -> Result<PathBuf> {
    let owner_dir = root.join(owner_dir_name(owner));
    fs::create_dir_all(&owner_dir)
        .await
        .with_context(|| format!("failed to create {}", owner_dir.display()))?;
    let stamp = at.format("%Y-%m-%d_%H-%M-%S").to_string();
    for attempt in 1..=MAX_DIR_SUFFIX {
        let name = if attempt == 1 {
            stamp.clone()
        } else {
            format!("{}-{}", stamp, attempt)
        };
        let candidate = owner_dir.join(name);
        match fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("failed to create {}", candidate.display()))
            }
        }
    }
    anyhow::bail!(
        "too many exports named {} under {}",
        stamp,
        owner_dir.display()
    )
}

fn ensure_free_space(dir: &Path, required: u64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }
    let available = fs2::available_space(dir)
        .with_context(|| format!("failed to query free space for {}", dir.display()))?;
    if available < required {
        return Err(ExportError::InsufficientSpace {
            available,
            required,
        }
        .into());
    }
    Ok(())
}

/// Best-effort removal of a partial bundle.
async fn remove_bundle(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => info!(path = %dir.display(), "removed partial export"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => error!(?err, path = %dir.display(), "failed to remove partial export"),
    }
    if let Some(owner_dir) = dir.parent() {
        // Only succeeds when no other bundle lives there.
        let _ = fs::remove_dir(owner_dir).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn owner_names_are_path_safe() {
        assert_eq!(owner_dir_name("did:plc:abc123"), "did:plc:abc123");
        assert_eq!(owner_dir_name("../../etc"), ".._.._etc");
        assert_eq!(owner_dir_name(".."), "__");
        assert_eq!(owner_dir_name("a/b\\c"), "a_b_c");
    }

    #[tokio::test]
    async fn same_second_exports_get_distinct_dirs() {
        let td = tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 5).unwrap();
        let a = create_export_dir(td.path(), "did:plc:alice", at).await.unwrap();
        let b = create_export_dir(td.path(), "did:plc:alice", at).await.unwrap();
        assert_eq!(a.file_name().unwrap(), "2024-06-01_08-30-05");
        assert_eq!(b.file_name().unwrap(), "2024-06-01_08-30-05-2");
        assert_eq!(a.parent(), b.parent());
    }

    #[test]
    fn free_space_check() {
        let td = tempdir().unwrap();
        assert!(ensure_free_space(td.path(), 0).is_ok());
        assert!(ensure_free_space(td.path(), 1).is_ok());
        let err = ensure_free_space(td.path(), u64::MAX).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::InsufficientSpace { .. })
        ));
    }
}
