use thiserror::Error;

/// Errors surfaced to callers of the exporter. Failures inside a running job are
/// not returned here; they end up in the job's `Failed` status instead.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),
    #[error("invalid export format '{0}' (expected json or csv)")]
    InvalidFormat(String),
    #[error("invalid owner id: {0}")]
    InvalidOwner(&'static str),
    #[error("insufficient disk space: {available} bytes free, {required} required")]
    InsufficientSpace { available: u64, required: u64 },
    #[error("an export is already running for {owner} (job {job_id})")]
    Conflict { owner: String, job_id: String },
    #[error("export {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ExportError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ExportError::Conflict { .. })
    }
}
