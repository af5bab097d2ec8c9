use super::model::{media_from_row, post_from_row, record_from_row, POST_COLUMNS};
use crate::model::{DateRange, ExportRecord, Media, Post};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL so exports can read while the collector writes.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // SQLite refuses to create a missing file unless asked to.
    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Count posts for `owner` using the same predicate as [`fetch_posts_page`].
#[instrument(skip_all)]
pub async fn count_posts(pool: &Pool, owner: &str, range: Option<&DateRange>) -> Result<i64> {
    let (start, end) = bounds(range);
    let cnt: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM posts \
         WHERE author_did = ? \
           AND (? IS NULL OR created_at >= ?) \
           AND (? IS NULL OR created_at <= ?)",
    )
    .bind(owner)
    .bind(start)
    .bind(start)
    .bind(end)
    .bind(end)
    .fetch_one(pool)
    .await
    .context("failed to count posts")?;
    Ok(cnt)
}

/// One page of posts ordered by `(created_at DESC, uri ASC)`. The uri tie-break
/// keeps pages stable when many posts share a timestamp.
#[instrument(skip_all)]
pub async fn fetch_posts_page(
    pool: &Pool,
    owner: &str,
    range: Option<&DateRange>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Post>> {
    let (start, end) = bounds(range);
    let sql = format!(
        "SELECT {POST_COLUMNS} FROM posts \
         WHERE author_did = ? \
           AND (? IS NULL OR created_at >= ?) \
           AND (? IS NULL OR created_at <= ?) \
         ORDER BY created_at DESC, uri ASC \
         LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query(&sql)
        .bind(owner)
        .bind(start)
        .bind(start)
        .bind(end)
        .bind(end)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .with_context(|| format!("failed to fetch posts at offset {}", offset))?;
    rows.iter().map(post_from_row).collect()
}

fn bounds(range: Option<&DateRange>) -> (Option<i64>, Option<i64>) {
    match range {
        Some(r) => (r.start_millis(), r.end_millis()),
        None => (None, None),
    }
}

#[instrument(skip_all)]
pub async fn media_for_post(pool: &Pool, post_uri: &str) -> Result<Vec<Media>> {
    let rows = sqlx::query(
        "SELECT cid, post_uri, mime_type, local_path, size_bytes FROM media \
         WHERE post_uri = ? ORDER BY cid ASC",
    )
    .bind(post_uri)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to load media for {}", post_uri))?;
    rows.iter().map(media_from_row).collect()
}

#[instrument(skip_all)]
pub async fn insert_export_record(pool: &Pool, record: &ExportRecord) -> Result<()> {
    let (start, end) = bounds(record.date_range.as_ref());
    sqlx::query(
        "INSERT INTO export_records \
         (id, owner, format, dir_path, post_count, media_count, size_bytes, range_start, range_end, manifest_path) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.owner)
    .bind(record.format.as_str())
    .bind(&record.dir_path)
    .bind(record.post_count)
    .bind(record.media_count)
    .bind(record.size_bytes)
    .bind(start)
    .bind(end)
    .bind(&record.manifest_path)
    .execute(pool)
    .await
    .with_context(|| format!("failed to persist export record {}", record.id))?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_export_record(pool: &Pool, id: &str) -> Result<Option<ExportRecord>> {
    let row = sqlx::query("SELECT * FROM export_records WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(record_from_row).transpose()
}

/// All records for `owner`, newest first.
#[instrument(skip_all)]
pub async fn list_export_records(pool: &Pool, owner: &str) -> Result<Vec<ExportRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM export_records WHERE owner = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;
    rows.iter().map(record_from_row).collect()
}

#[instrument(skip_all)]
pub async fn delete_export_record(pool: &Pool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM export_records WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
