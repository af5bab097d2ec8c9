//! Row mappers used by repositories.
//!
//! Keep these focused on turning columns into entities. Business logic
//! should live in higher layers.

use crate::model::{DateRange, ExportFormat, ExportRecord, Media, Post};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) const POST_COLUMNS: &str = "uri, cid, author_did, text, created_at, indexed_at, \
     like_count, repost_count, reply_count, quote_count, reply_parent, reply_root, quote_uri, \
     has_media, embed";

pub(crate) fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp {} out of range", ms))
}

/// Malformed embed JSON is kept as a plain string so the row still exports.
fn parse_embed(raw: Option<String>) -> Option<Value> {
    let raw = raw.filter(|s| !s.trim().is_empty())?;
    Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
}

pub(crate) fn post_from_row(row: &SqliteRow) -> Result<Post> {
    Ok(Post {
        uri: row.try_get("uri")?,
        cid: row.try_get("cid")?,
        author_did: row.try_get("author_did")?,
        text: row.try_get("text")?,
        created_at: millis_to_utc(row.try_get("created_at")?)?,
        indexed_at: millis_to_utc(row.try_get("indexed_at")?)?,
        like_count: row.try_get("like_count")?,
        repost_count: row.try_get("repost_count")?,
        reply_count: row.try_get("reply_count")?,
        quote_count: row.try_get("quote_count")?,
        reply_parent: row.try_get::<Option<String>, _>("reply_parent")?,
        reply_root: row.try_get::<Option<String>, _>("reply_root")?,
        quote_uri: row.try_get::<Option<String>, _>("quote_uri")?,
        has_media: row.try_get::<bool, _>("has_media")?,
        embed: parse_embed(row.try_get::<Option<String>, _>("embed")?),
    })
}

pub(crate) fn media_from_row(row: &SqliteRow) -> Result<Media> {
    Ok(Media {
        cid: row.try_get("cid")?,
        post_uri: row.try_get("post_uri")?,
        mime_type: row.try_get("mime_type")?,
        local_path: row.try_get("local_path")?,
        size_bytes: row.try_get("size_bytes")?,
    })
}

pub(crate) fn record_from_row(row: &SqliteRow) -> Result<ExportRecord> {
    let format: String = row.try_get("format")?;
    let format: ExportFormat = format.parse()?;
    let start = row
        .try_get::<Option<i64>, _>("range_start")?
        .map(millis_to_utc)
        .transpose()?;
    let end = row
        .try_get::<Option<i64>, _>("range_end")?
        .map(millis_to_utc)
        .transpose()?;
    let date_range = if start.is_some() || end.is_some() {
        Some(DateRange { start, end })
    } else {
        None
    };
    Ok(ExportRecord {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        format,
        dir_path: row.try_get("dir_path")?,
        post_count: row.try_get("post_count")?,
        media_count: row.try_get("media_count")?,
        size_bytes: row.try_get("size_bytes")?,
        date_range,
        manifest_path: row.try_get("manifest_path")?,
    })
}
