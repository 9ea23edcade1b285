//! In-memory implementations of the storage capabilities, for tests.

use crate::blob_store::{BlobLocation, BlobStore};
use crate::catalog_store::{CatalogPage, CatalogStore};
use crate::model::{CatalogEntry, EntryStatus, Source};
use crate::search_index::{SearchDocument, SearchIndex};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use strsim::levenshtein;

/// Catalog store over a map, with the same put semantics as Postgres
#[derive(Default)]
pub struct InMemoryCatalogStore {
    entries: RwLock<BTreeMap<(String, Source), CatalogEntry>>,
    puts: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("catalog store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn get(&self, id: &str, source: Source) -> Result<Option<CatalogEntry>> {
        self.check()?;
        let entries = self.entries.read();
        Ok(entries.get(&(id.to_string(), source)).cloned())
    }

    async fn put(&self, entry: &CatalogEntry) -> Result<()> {
        self.check()?;
        self.puts.fetch_add(1, Ordering::SeqCst);

        let mut entries = self.entries.write();
        let key = (entry.id.clone(), entry.source);
        let mut stored = entry.clone();
        if let Some(existing) = entries.get(&key) {
            stored.created_at = existing.created_at;
        }
        entries.insert(key, stored);
        Ok(())
    }

    async fn batch_get(&self, source: Source, ids: &[String]) -> Result<Vec<CatalogEntry>> {
        self.check()?;
        let entries = self.entries.read();
        Ok(ids
            .iter()
            .filter_map(|id| entries.get(&(id.clone(), source)).cloned())
            .collect())
    }

    async fn query_processed(&self, before: Option<i64>, limit: usize) -> Result<CatalogPage> {
        self.check()?;
        let entries = self.entries.read();

        let mut matching: Vec<&CatalogEntry> = entries
            .values()
            .filter(|e| e.status == EntryStatus::Processed)
            .filter(|e| before.map_or(true, |cursor| e.created_at < cursor))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let page: Vec<CatalogEntry> = matching.iter().take(limit).map(|e| (*e).clone()).collect();
        let has_more = match page.last() {
            Some(last) if page.len() == limit => {
                matching.iter().any(|e| e.created_at < last.created_at)
            }
            _ => false,
        };

        Ok(CatalogPage {
            entries: page,
            has_more,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// A blob recorded by [`InMemoryBlobStore`]
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Blob store that keeps objects in memory
pub struct InMemoryBlobStore {
    bucket: String,
    blobs: RwLock<HashMap<String, StoredBlob>>,
    puts: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            blobs: RwLock::new(HashMap::new()),
            puts: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<StoredBlob> {
        self.blobs.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<BlobLocation> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("blob store unavailable");
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.blobs.write().insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(BlobLocation {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }
}

/// Search index with token-level Levenshtein matching
#[derive(Default)]
pub struct InMemorySearchIndex {
    documents: RwLock<BTreeMap<String, SearchDocument>>,
    failing: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn document(&self, id: &str) -> Option<SearchDocument> {
        self.documents.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("search index unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn upsert_document(&self, document: &SearchDocument) -> Result<()> {
        self.check()?;
        self.documents
            .write()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        self.check()?;
        self.documents.write().remove(id);
        Ok(())
    }

    async fn fuzzy_search(
        &self,
        fields: &[&'static str],
        value: &str,
        max_edit_distance: u8,
        limit: usize,
    ) -> Result<Vec<String>> {
        self.check()?;
        let query_terms: Vec<String> = value.split_whitespace().map(str::to_lowercase).collect();
        let documents = self.documents.read();

        let matches = |text: &str| {
            text.split_whitespace().any(|token| {
                let token = token.to_lowercase();
                query_terms
                    .iter()
                    .any(|term| levenshtein(term, &token) <= max_edit_distance as usize)
            })
        };

        Ok(documents
            .values()
            .filter(|doc| {
                fields.iter().any(|field| match *field {
                    "keyword" => matches(&doc.keyword),
                    "labels" => doc.labels.iter().any(|label| matches(label)),
                    _ => false,
                })
            })
            .take(limit)
            .map(|doc| doc.id.clone())
            .collect())
    }
}
