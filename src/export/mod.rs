//! Archive export pipeline.
//!
//! [`Exporter::start_export`] validates a request, applies the one-export-per-owner
//! guard, registers the job and spawns its run on the tokio runtime. Callers poll
//! [`Exporter::status`] or drain the returned update channel.

use crate::config;
use crate::model::{
    DateRange, ExportJob, ExportOptions, ExportProgress, ExportRecord, ExportStatusView,
};
use crate::store::ArchiveStore;
use anyhow::Context;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

pub mod embed;
pub mod encode;
mod error;
pub mod job;
pub mod manifest;
pub mod media;
pub mod paginate;
pub mod registry;

pub use error::ExportError;
pub use registry::JobRegistry;

use job::{ExportRun, Publisher};

/// Tunables for every job started by an [`Exporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSettings {
    pub page_size: i64,
    pub min_free_bytes: u64,
    pub progress_buffer: usize,
    /// How long a finished job waits for room on a full update channel.
    pub final_send_timeout: Duration,
}

pub const DEFAULT_FINAL_SEND_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            page_size: paginate::DEFAULT_PAGE_SIZE,
            min_free_bytes: 100 * 1024 * 1024,
            progress_buffer: 32,
            final_send_timeout: DEFAULT_FINAL_SEND_TIMEOUT,
        }
    }
}

impl From<&config::Export> for ExportSettings {
    fn from(cfg: &config::Export) -> Self {
        Self {
            page_size: cfg.page_size,
            min_free_bytes: cfg.min_free_bytes,
            progress_buffer: cfg.progress_buffer,
            final_send_timeout: DEFAULT_FINAL_SEND_TIMEOUT,
        }
    }
}

/// Returned by [`Exporter::start_export`]. Dropping `updates` does not affect
/// the job. A receiver that is kept but never read only holds the job's task
/// for [`ExportSettings::final_send_timeout`] after it finishes; the final
/// state is always readable through [`Exporter::status`].
#[derive(Debug)]
pub struct ExportHandle {
    pub job_id: String,
    pub updates: mpsc::Receiver<ExportProgress>,
}

#[derive(Clone)]
pub struct Exporter {
    store: Arc<dyn ArchiveStore>,
    registry: JobRegistry,
    settings: ExportSettings,
}

impl Exporter {
    pub fn new(store: Arc<dyn ArchiveStore>, settings: ExportSettings) -> Self {
        Self::with_registry(store, JobRegistry::new(), settings)
    }

    pub fn with_registry(
        store: Arc<dyn ArchiveStore>,
        registry: JobRegistry,
        settings: ExportSettings,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Accept an export request and run it in the background.
    ///
    /// Fails synchronously on invalid input or when the owner already has an
    /// export queued or running; no job is created in either case. Must be
    /// called from within a tokio runtime.
    #[instrument(skip_all, fields(owner = %options.owner))]
    pub fn start_export(&self, options: ExportOptions) -> Result<ExportHandle, ExportError> {
        validate(&options)?;
        let job = self.registry.try_register(options)?;

        let (tx, rx) = mpsc::channel(self.settings.progress_buffer.max(1));
        let publisher = Publisher::new(
            self.registry.clone(),
            job.id.clone(),
            tx,
            self.settings.final_send_timeout,
        );
        let run = ExportRun::new(
            Arc::clone(&self.store),
            self.settings,
            job.options.clone(),
            job.id.clone(),
            job.created_at,
            publisher,
        );
        tokio::spawn(run.run());
        info!(job_id = %job.id, "export queued");

        Ok(ExportHandle {
            job_id: job.id,
            updates: rx,
        })
    }

    pub fn status(&self, job_id: &str) -> Option<ExportStatusView> {
        self.registry
            .get(job_id)
            .map(|job| ExportStatusView::from(&job.progress))
    }

    pub fn job(&self, job_id: &str) -> Option<ExportJob> {
        self.registry.get(job_id)
    }

    pub fn jobs_for_owner(&self, owner: &str) -> Vec<ExportJob> {
        self.registry.jobs_for_owner(owner)
    }

    /// Completed exports for `owner`, newest first.
    pub async fn list_exports(&self, owner: &str) -> Result<Vec<ExportRecord>, ExportError> {
        Ok(self.store.list_export_records(owner).await?)
    }

    /// Remove a completed export: the record first, then the bundle directory.
    /// Records owned by someone else are reported as not found.
    #[instrument(skip_all, fields(owner = %owner, record_id = %record_id))]
    pub async fn delete_export(
        &self,
        owner: &str,
        record_id: &str,
    ) -> Result<ExportRecord, ExportError> {
        let record = self
            .store
            .get_export_record(record_id)
            .await?
            .filter(|r| r.owner == owner)
            .ok_or_else(|| ExportError::NotFound(record_id.to_string()))?;

        self.store
            .delete_export_record(&record.id)
            .await
            .context("failed to delete export record")?;
        // A directory without a record is an absent bundle.
        match tokio::fs::remove_dir_all(Path::new(&record.dir_path)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(?err, path = %record.dir_path, "failed to remove export directory"),
        }
        info!("export deleted");
        Ok(record)
    }
}

fn validate(options: &ExportOptions) -> Result<(), ExportError> {
    let owner = options.owner.trim();
    if owner.is_empty() {
        return Err(ExportError::InvalidOwner("owner id must be non-empty"));
    }
    if owner != options.owner {
        return Err(ExportError::InvalidOwner(
            "owner id must not have surrounding whitespace",
        ));
    }
    if options.output_root.as_os_str().is_empty() {
        return Err(ExportError::Storage(anyhow::anyhow!(
            "export root directory is not configured"
        )));
    }
    if let Some(range) = &options.date_range {
        DateRange::new(range.start, range.end)?;
    }
    Ok(())
}
