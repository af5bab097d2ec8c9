//! Media hash extraction from post embed descriptors.
//!
//! Recognized shapes:
//! - `app.bsky.embed.images`: `images[].image` blobs
//! - `app.bsky.embed.video`: the `video` blob
//! - `app.bsky.embed.recordWithMedia`: either of the above under `media`
//! - `app.bsky.embed.external`: the optional `external.thumb` blob
//!
//! Anything else yields no hashes.

use serde_json::Value;

pub const EMBED_IMAGES: &str = "app.bsky.embed.images";
pub const EMBED_VIDEO: &str = "app.bsky.embed.video";
pub const EMBED_RECORD_WITH_MEDIA: &str = "app.bsky.embed.recordWithMedia";
pub const EMBED_EXTERNAL: &str = "app.bsky.embed.external";

/// The descriptor's `$type`, if it has one.
pub fn embed_type(embed: Option<&Value>) -> Option<&str> {
    embed?.get("$type")?.as_str()
}

/// Content hashes of every blob referenced by the embed, in descriptor order.
pub fn media_cids(embed: Option<&Value>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(embed) = embed {
        collect(embed, &mut out, true);
    }
    out
}

fn collect(embed: &Value, out: &mut Vec<String>, allow_wrapper: bool) {
    match embed_type(Some(embed)) {
        Some(EMBED_IMAGES) => {
            let Some(images) = embed.get("images").and_then(Value::as_array) else {
                return;
            };
            out.extend(
                images
                    .iter()
                    .filter_map(|img| img.get("image").and_then(blob_cid)),
            );
        }
        Some(EMBED_VIDEO) => {
            out.extend(embed.get("video").and_then(blob_cid));
        }
        Some(EMBED_EXTERNAL) => {
            out.extend(
                embed
                    .get("external")
                    .and_then(|ext| ext.get("thumb"))
                    .and_then(blob_cid),
            );
        }
        Some(EMBED_RECORD_WITH_MEDIA) if allow_wrapper => {
            if let Some(media) = embed.get("media") {
                collect(media, out, false);
            }
        }
        _ => {}
    }
}

/// A blob reference is either `{"ref": {"$link": cid}}` or the legacy `{"cid": cid}`.
fn blob_cid(blob: &Value) -> Option<String> {
    let link = blob
        .get("ref")
        .and_then(|r| r.get("$link"))
        .or_else(|| blob.get("cid"))?
        .as_str()?
        .trim();
    if link.is_empty() {
        None
    } else {
        Some(link.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_image_set() {
        let embed = json!({
            "$type": EMBED_IMAGES,
            "images": [
                {"alt": "a", "image": {"$type": "blob", "ref": {"$link": "bafyA"}, "mimeType": "image/jpeg"}},
                {"alt": "b", "image": {"cid": "bafyB", "mimeType": "image/png"}},
                {"alt": "broken"}
            ]
        });
        assert_eq!(media_cids(Some(&embed)), vec!["bafyA", "bafyB"]);
        assert_eq!(embed_type(Some(&embed)), Some(EMBED_IMAGES));
    }

    #[test]
    fn images_inside_quote_with_media() {
        let embed = json!({
            "$type": EMBED_RECORD_WITH_MEDIA,
            "record": {"record": {"uri": "at://bob/post/1", "cid": "bafyQuoted"}},
            "media": {
                "$type": EMBED_IMAGES,
                "images": [{"image": {"ref": {"$link": "bafyC"}}}]
            }
        });
        assert_eq!(media_cids(Some(&embed)), vec!["bafyC"]);
    }

    #[test]
    fn external_thumbnail_and_video() {
        let ext = json!({
            "$type": EMBED_EXTERNAL,
            "external": {"uri": "https://example.com", "title": "t", "thumb": {"ref": {"$link": "bafyT"}}}
        });
        assert_eq!(media_cids(Some(&ext)), vec!["bafyT"]);

        let no_thumb = json!({"$type": EMBED_EXTERNAL, "external": {"uri": "https://example.com"}});
        assert!(media_cids(Some(&no_thumb)).is_empty());

        let video = json!({"$type": EMBED_VIDEO, "video": {"ref": {"$link": "bafyV"}}});
        assert_eq!(media_cids(Some(&video)), vec!["bafyV"]);
    }

    #[test]
    fn unknown_or_malformed_descriptors_degrade_to_empty() {
        assert!(media_cids(None).is_empty());
        assert!(media_cids(Some(&json!("not an object"))).is_empty());
        assert!(media_cids(Some(&json!({"$type": "app.bsky.embed.record"}))).is_empty());
        assert!(media_cids(Some(&json!({"$type": EMBED_IMAGES, "images": "nope"}))).is_empty());
        assert!(media_cids(Some(&json!({"images": [{"image": {"cid": "x"}}]}))).is_empty());
        let nested = json!({
            "$type": EMBED_RECORD_WITH_MEDIA,
            "media": {"$type": EMBED_RECORD_WITH_MEDIA, "media": {"$type": EMBED_VIDEO, "video": {"cid": "deep"}}}
        });
        assert!(media_cids(Some(&nested)).is_empty());
        assert_eq!(embed_type(Some(&json!(42))), None);
    }
}
