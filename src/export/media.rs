use crate::model::Media;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Source → destination copies, deduplicated by content hash. Iteration order is
/// by hash, so repeated runs copy in the same order.
#[derive(Debug, Clone, Default)]
pub struct MediaCopyPlan {
    media_dir: PathBuf,
    entries: BTreeMap<String, (PathBuf, PathBuf)>,
}

impl MediaCopyPlan {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Returns false when a blob with the same hash is already planned, or when
    /// the hash is not usable as a file name as-is.
    pub fn add(&mut self, media: &Media) -> bool {
        if self.entries.contains_key(&media.cid) {
            return false;
        }
        if media.cid.is_empty() || file_stem(&media.cid) != media.cid {
            warn!(cid = %media.cid, post = %media.post_uri, "media hash is not path-safe; skipping");
            return false;
        }
        let dest = self.media_dir.join(media_file_name(media));
        self.entries
            .insert(media.cid.clone(), (PathBuf::from(&media.local_path), dest));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn copies(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries
            .values()
            .map(|(src, dst)| (src.as_path(), dst.as_path()))
    }
}

/// `<cid>.<ext>` with anything but `[A-Za-z0-9_-]` stripped from the hash.
pub fn media_file_name(media: &Media) -> String {
    format!(
        "{}.{}",
        file_stem(&media.cid),
        media_extension(&media.mime_type, &media.local_path)
    )
}

fn file_stem(cid: &str) -> String {
    cid.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

fn media_extension(mime: &str, local_path: &str) -> String {
    let by_mime = match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/webm" => Some("webm"),
        _ => None,
    };
    if let Some(ext) = by_mime {
        return ext.to_string();
    }
    Path::new(local_path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

/// Copy every planned file, skipping (and logging) sources that are missing or
/// unreadable. `on_copied` receives the running count after each successful
/// copy and must not block. Returns the number of files copied.
pub async fn copy_media<F>(plan: &MediaCopyPlan, mut on_copied: F) -> u64
where
    F: FnMut(u64) + Send,
{
    let mut copied = 0u64;
    for (src, dst) in plan.copies() {
        match copy_one(src, dst).await {
            Ok(bytes) => {
                copied += 1;
                debug!(src = %src.display(), bytes, "copied media");
                on_copied(copied);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(src = %src.display(), "media file missing; skipping");
            }
            Err(err) => {
                warn!(?err, src = %src.display(), dst = %dst.display(), "failed to copy media; skipping");
                let _ = fs::remove_file(dst).await;
            }
        }
    }
    copied
}

async fn copy_one(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let mut reader = File::open(src).await?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut writer = File::create(dst).await?;
    let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    Ok(bytes)
}
