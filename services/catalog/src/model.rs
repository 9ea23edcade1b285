//! Catalog data model shared by the ingest pipeline and the read path.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

/// Upstream provider an item was discovered through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Unsplash,
    Giphy,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Unsplash => "unsplash",
            Source::Giphy => "giphy",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unsplash" => Ok(Source::Unsplash),
            "giphy" => Ok(Source::Giphy),
            other => Err(anyhow::anyhow!("unknown source: {other}")),
        }
    }
}

/// An unprocessed search result, consumed once by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    /// Provider-scoped identifier
    pub identifier: String,
    pub source: Source,
    /// Where the media bytes can be downloaded from
    pub origin_url: String,
    /// Keyword the item was found with
    pub search_keyword: String,
}

/// Processing status of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Processed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Processed => "processed",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(EntryStatus::Processed),
            other => Err(anyhow::anyhow!("unknown entry status: {other}")),
        }
    }
}

/// Durable record of one fully processed item, keyed by `(id, source)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub source: Source,
    pub origin_url: String,
    /// Location of the processed media in the blob store
    pub blob_key: String,
    pub search_keyword: String,
    pub labels: BTreeSet<String>,
    pub status: EntryStatus,
    /// Epoch seconds assigned at write time; also the listing sort key
    pub created_at: i64,
}

/// Public projection of a catalog entry returned to read clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicImage {
    pub id: String,
    pub keyword: String,
    pub image_url: String,
}

impl PublicImage {
    pub fn from_entry(entry: &CatalogEntry, public_media_base: &str) -> Self {
        Self {
            id: entry.id.clone(),
            keyword: entry.search_keyword.clone(),
            image_url: public_media_url(public_media_base, &entry.blob_key),
        }
    }
}

/// Blob key of the processed media: `<namespace>/<id>.<ext>`
pub fn processed_blob_key(namespace: &str, id: &str, extension: &str) -> String {
    format!("{}/{}.{}", namespace.trim_end_matches('/'), id, extension)
}

/// Blob key of the retained original frame: `<namespace>/<id>-original.jpg`
pub fn original_blob_key(namespace: &str, id: &str) -> String {
    format!("{}/{}-original.jpg", namespace.trim_end_matches('/'), id)
}

/// Resolve a blob key against the public distribution base.
///
/// The base may be a bare host (`d123.cloudfront.net`) or a full URL.
pub fn public_media_url(base: &str, blob_key: &str) -> String {
    let base = base.trim_end_matches('/');
    let key = blob_key.trim_start_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}/{key}")
    } else {
        format!("https://{base}/{key}")
    }
}

/// Assigns `created_at` values that never go backwards within a process,
/// even if the wall clock steps back. Ties are allowed.
#[derive(Debug, Default)]
pub struct CreatedAtClock {
    last: AtomicI64,
}

impl CreatedAtClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = Utc::now().timestamp();
        let previous = self.last.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }
}
