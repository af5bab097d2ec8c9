use crate::model::{ExportManifest, ExportOptions, ExportRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MEDIA_DIR: &str = "media";
pub const TOOL_VERSION: &str = concat!("skyvault/", env!("CARGO_PKG_VERSION"));

/// Describe a bundle. Media is listed as a count, never file by file.
pub fn build_manifest(
    options: &ExportOptions,
    exported_at: DateTime<Utc>,
    post_count: u64,
    media_count: u64,
) -> ExportManifest {
    let mut files = vec![
        options.format.data_file_name().to_string(),
        MANIFEST_FILE.to_string(),
    ];
    if options.include_media {
        files.push(format!("{}/ ({} files)", MEDIA_DIR, media_count));
    }
    ExportManifest {
        format: options.format,
        exported_at,
        post_count,
        media_count,
        date_range: options.filter().copied(),
        tool_version: TOOL_VERSION.to_string(),
        files,
    }
}

pub async fn write_manifest(dir: &Path, manifest: &ExportManifest) -> Result<PathBuf> {
    let path = dir.join(MANIFEST_FILE);
    let body = serde_json::to_vec_pretty(manifest).context("failed to encode manifest")?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Total size in bytes of all regular files under `dir`.
pub fn bundle_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok(total)
}

/// Record ids are `<owner>_<bundle dir name>`.
pub fn record_id(owner: &str, dir_name: &str) -> String {
    format!("{}_{}", owner, dir_name)
}

pub fn build_record(
    options: &ExportOptions,
    dir: &Path,
    manifest: &ExportManifest,
    manifest_path: &Path,
    size_bytes: u64,
) -> ExportRecord {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    ExportRecord {
        id: record_id(&options.owner, &dir_name),
        owner: options.owner.clone(),
        format: options.format,
        dir_path: dir.to_string_lossy().to_string(),
        post_count: manifest.post_count as i64,
        media_count: manifest.media_count as i64,
        size_bytes: size_bytes as i64,
        date_range: manifest.date_range,
        manifest_path: manifest_path.to_string_lossy().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DateRange, ExportFormat};
    use tempfile::tempdir;

    fn options(include_media: bool) -> ExportOptions {
        ExportOptions {
            format: ExportFormat::Csv,
            owner: "did:plc:alice".into(),
            include_media,
            date_range: Some(DateRange::default()),
            output_root: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn manifest_lists_top_level_files() {
        let m = build_manifest(&options(true), Utc::now(), 10, 4);
        assert_eq!(m.files, vec!["posts.csv", "manifest.json", "media/ (4 files)"]);
        // An unbounded range is not a filter.
        assert_eq!(m.date_range, None);

        let m = build_manifest(&options(false), Utc::now(), 0, 0);
        assert_eq!(m.files, vec!["posts.csv", "manifest.json"]);
        assert!(m.tool_version.starts_with("skyvault/"));
    }

    #[tokio::test]
    async fn manifest_written_and_sized() {
        let td = tempdir().unwrap();
        let dir = td.path().join("2024-01-01_00-00-00");
        std::fs::create_dir_all(dir.join(MEDIA_DIR)).unwrap();
        std::fs::write(dir.join("posts.csv"), b"12345").unwrap();
        std::fs::write(dir.join(MEDIA_DIR).join("a.jpg"), b"123").unwrap();

        let opts = options(true);
        let manifest = build_manifest(&opts, Utc::now(), 1, 1);
        let path = write_manifest(&dir, &manifest).await.unwrap();
        let parsed: ExportManifest =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed, manifest);

        let size = bundle_size(&dir).unwrap();
        let manifest_len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(size, 8 + manifest_len);

        let record = build_record(&opts, &dir, &manifest, &path, size);
        assert_eq!(record.id, "did:plc:alice_2024-01-01_00-00-00");
        assert_eq!(record.size_bytes as u64, size);
        assert_eq!(record.post_count, 1);
    }
}
