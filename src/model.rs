use crate::export::ExportError;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One archived post. Read-only to the exporter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub like_count: i64,
    pub repost_count: i64,
    pub reply_count: i64,
    pub quote_count: i64,
    pub reply_parent: Option<String>,
    pub reply_root: Option<String>,
    pub quote_uri: Option<String>,
    pub has_media: bool,
    /// Raw embed descriptor as stored by the collector.
    pub embed: Option<Value>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.reply_parent.is_some()
    }
}

/// One stored media blob, keyed by its content hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Media {
    pub cid: String,
    pub post_uri: String,
    pub mime_type: String,
    pub local_path: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    /// File name of the posts data file inside a bundle.
    pub fn data_file_name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "posts.json",
            ExportFormat::Csv => "posts.csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ExportError::InvalidFormat(other.to_string())),
        }
    }
}

/// Inclusive creation-time filter. Either bound may be open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, ExportError> {
        if let (Some(s), Some(e)) = (start, end) {
            if e < s {
                return Err(ExportError::InvalidDateRange(format!(
                    "end {} is before start {}",
                    e.to_rfc3339(),
                    s.to_rfc3339()
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Parse user-supplied bounds. Accepts `YYYY-MM-DD` or RFC 3339; a date-only
    /// end bound covers the whole day.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, ExportError> {
        let start = start.map(|s| parse_bound(s, false)).transpose()?;
        let end = end.map(|s| parse_bound(s, true)).transpose()?;
        Self::new(start, end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }

    pub fn start_millis(&self) -> Option<i64> {
        self.start.map(|t| t.timestamp_millis())
    }

    pub fn end_millis(&self) -> Option<i64> {
        self.end.map(|t| t.timestamp_millis())
    }
}

fn parse_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, ExportError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ExportError::InvalidDateRange(format!("unrecognized date '{raw}'")))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    let time = time.unwrap_or_default();
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Immutable parameters of one export request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub owner: String,
    pub include_media: bool,
    pub date_range: Option<DateRange>,
    pub output_root: PathBuf,
}

impl ExportOptions {
    /// Date range with unbounded ranges collapsed to `None`.
    pub fn filter(&self) -> Option<&DateRange> {
        self.date_range.as_ref().filter(|r| !r.is_unbounded())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Queued => "queued",
            ExportStatus::Running => "running",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ExportStatus::Queued | ExportStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Live status of one job, snapshotted after every page and media batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportProgress {
    pub status: ExportStatus,
    pub posts_processed: u64,
    pub posts_total: u64,
    pub media_copied: u64,
    pub media_total: u64,
    pub error: Option<String>,
    /// Informational note for the user, e.g. when nothing matched the filter.
    pub message: Option<String>,
}

impl Default for ExportProgress {
    fn default() -> Self {
        Self {
            status: ExportStatus::Queued,
            posts_processed: 0,
            posts_total: 0,
            media_copied: 0,
            media_total: 0,
            error: None,
            message: None,
        }
    }
}

impl ExportProgress {
    /// Completion over posts and media work units, in `0.0..=100.0`.
    pub fn percent_complete(&self) -> f64 {
        if self.status == ExportStatus::Completed {
            return 100.0;
        }
        let total = self.posts_total + self.media_total;
        if total == 0 {
            return 0.0;
        }
        let done = self.posts_processed + self.media_copied;
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

/// One export attempt tracked by the registry.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: String,
    pub options: ExportOptions,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: ExportProgress,
    pub export_dir: Option<PathBuf>,
}

/// Poll-style status read.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExportStatusView {
    pub status: ExportStatus,
    pub posts_processed: u64,
    pub posts_total: u64,
    pub media_copied: u64,
    pub media_total: u64,
    pub percent_complete: f64,
    pub error: Option<String>,
}

impl From<&ExportProgress> for ExportStatusView {
    fn from(p: &ExportProgress) -> Self {
        Self {
            status: p.status,
            posts_processed: p.posts_processed,
            posts_total: p.posts_total,
            media_copied: p.media_copied,
            media_total: p.media_total,
            percent_complete: p.percent_complete(),
            error: p.error.clone(),
        }
    }
}

/// Durable audit entry for a completed export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportRecord {
    pub id: String,
    pub owner: String,
    pub format: ExportFormat,
    pub dir_path: String,
    pub post_count: i64,
    pub media_count: i64,
    pub size_bytes: i64,
    pub date_range: Option<DateRange>,
    pub manifest_path: String,
}

/// Summary document written as `manifest.json` into every bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub format: ExportFormat,
    pub exported_at: DateTime<Utc>,
    pub post_count: u64,
    pub media_count: u64,
    pub date_range: Option<DateRange>,
    pub tool_version: String,
    pub files: Vec<String>,
}
