//! Streaming encoders for the posts data file.
//!
//! Both writers accept one page at a time and keep no records between calls.
//! Writing a sequence of pages produces exactly the bytes [`encode_json`] /
//! [`encode_csv`] would produce for the concatenated pages.

use super::embed;
use crate::model::{ExportFormat, Post};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// UTF-8 byte-order marker so spreadsheet tools pick the right encoding.
pub const CSV_BOM: &str = "\u{FEFF}";

pub const CSV_HEADER: [&str; 15] = [
    "uri",
    "cid",
    "author_did",
    "text",
    "created_at",
    "like_count",
    "repost_count",
    "reply_count",
    "quote_count",
    "is_reply",
    "reply_parent",
    "has_media",
    "media_cids",
    "embed_type",
    "indexed_at",
];

/// Flat projection of a post shared by the tabular output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRow {
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub text: String,
    pub created_at: String,
    pub like_count: i64,
    pub repost_count: i64,
    pub reply_count: i64,
    pub quote_count: i64,
    pub is_reply: bool,
    pub reply_parent: String,
    pub has_media: bool,
    pub media_cids: Vec<String>,
    pub embed_type: String,
    pub indexed_at: String,
}

impl PostRow {
    pub fn from_post(post: &Post) -> Self {
        Self {
            uri: post.uri.clone(),
            cid: post.cid.clone(),
            author_did: post.author_did.clone(),
            text: post.text.clone(),
            created_at: iso8601(post.created_at),
            like_count: post.like_count,
            repost_count: post.repost_count,
            reply_count: post.reply_count,
            quote_count: post.quote_count,
            is_reply: post.is_reply(),
            reply_parent: post.reply_parent.clone().unwrap_or_default(),
            has_media: post.has_media,
            media_cids: embed::media_cids(post.embed.as_ref()),
            embed_type: embed::embed_type(post.embed.as_ref())
                .unwrap_or_default()
                .to_string(),
            indexed_at: iso8601(post.indexed_at),
        }
    }

    /// Column values in [`CSV_HEADER`] order.
    pub fn fields(&self) -> [String; 15] {
        [
            self.uri.clone(),
            self.cid.clone(),
            self.author_did.clone(),
            self.text.clone(),
            self.created_at.clone(),
            self.like_count.to_string(),
            self.repost_count.to_string(),
            self.reply_count.to_string(),
            self.quote_count.to_string(),
            self.is_reply.to_string(),
            self.reply_parent.clone(),
            self.has_media.to_string(),
            self.media_cids.join(";"),
            self.embed_type.clone(),
            self.indexed_at.clone(),
        ]
    }
}

fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Quote a CSV field when it contains the delimiter, a quote or a line break.
pub fn escape_csv(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = fields
        .into_iter()
        .map(|f| escape_csv(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// One-shot JSON encoding of a complete post list.
pub fn encode_json(posts: &[Post]) -> Result<String> {
    Ok(serde_json::to_string_pretty(posts)?)
}

/// One-shot CSV encoding of a complete post list.
pub fn encode_csv(posts: &[Post]) -> String {
    let mut out = String::from(CSV_BOM);
    out.push_str(&csv_line(CSV_HEADER));
    for post in posts {
        out.push_str(&csv_line(PostRow::from_post(post).fields()));
    }
    out
}

/// Writes a pretty-printed JSON array incrementally.
pub struct JsonArrayWriter<W> {
    out: W,
    opened: bool,
    first: bool,
}

impl<W: AsyncWrite + Unpin + Send> JsonArrayWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            opened: false,
            first: true,
        }
    }

    async fn open(&mut self) -> Result<()> {
        if !self.opened {
            self.out.write_all(b"[").await?;
            self.opened = true;
        }
        Ok(())
    }

    pub async fn write_page(&mut self, posts: &[Post]) -> Result<()> {
        self.open().await?;
        let mut buf = Vec::new();
        for post in posts {
            buf.extend_from_slice(if self.first { b"\n" } else { b",\n" });
            self.first = false;
            let pretty = serde_json::to_string_pretty(post)
                .with_context(|| format!("failed to serialize {}", post.uri))?;
            // Elements sit one level deep inside the array.
            for (i, line) in pretty.split('\n').enumerate() {
                if i > 0 {
                    buf.push(b'\n');
                }
                buf.extend_from_slice(b"  ");
                buf.extend_from_slice(line.as_bytes());
            }
        }
        self.out.write_all(&buf).await?;
        self.out.flush().await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<W> {
        self.open().await?;
        let tail: &[u8] = if self.first { b"]" } else { b"\n]" };
        self.out.write_all(tail).await?;
        self.out.flush().await?;
        Ok(self.out)
    }
}

/// Writes BOM + header once, then rows, flushing after each page.
pub struct CsvRowWriter<W> {
    out: W,
    started: bool,
}

impl<W: AsyncWrite + Unpin + Send> CsvRowWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            started: false,
        }
    }

    async fn start(&mut self) -> Result<()> {
        if !self.started {
            self.out.write_all(CSV_BOM.as_bytes()).await?;
            self.out.write_all(csv_line(CSV_HEADER).as_bytes()).await?;
            self.started = true;
        }
        Ok(())
    }

    pub async fn write_page(&mut self, posts: &[Post]) -> Result<()> {
        self.start().await?;
        let mut buf = String::new();
        for post in posts {
            buf.push_str(&csv_line(PostRow::from_post(post).fields()));
        }
        self.out.write_all(buf.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<W> {
        self.start().await?;
        self.out.flush().await?;
        Ok(self.out)
    }
}

/// Format-dispatching page encoder used by the job loop.
pub enum PostEncoder<W> {
    Json(JsonArrayWriter<W>),
    Csv(CsvRowWriter<W>),
}

impl<W: AsyncWrite + Unpin + Send> PostEncoder<W> {
    pub fn new(format: ExportFormat, out: W) -> Self {
        match format {
            ExportFormat::Json => PostEncoder::Json(JsonArrayWriter::new(out)),
            ExportFormat::Csv => PostEncoder::Csv(CsvRowWriter::new(out)),
        }
    }

    pub async fn write_page(&mut self, posts: &[Post]) -> Result<()> {
        match self {
            PostEncoder::Json(w) => w.write_page(posts).await,
            PostEncoder::Csv(w) => w.write_page(posts).await,
        }
    }

    pub async fn finish(self) -> Result<W> {
        match self {
            PostEncoder::Json(w) => w.finish().await,
            PostEncoder::Csv(w) => w.finish().await,
        }
    }
}
