//! Catalog read path: batch lookup, keyword search, and cursor listing.

use crate::catalog_store::CatalogStore;
use crate::model::{CatalogEntry, PublicImage, Source};
use crate::search_index::{SearchIndex, SEARCH_FIELDS};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// Edit distance tolerated by keyword search
pub const MAX_EDIT_DISTANCE: u8 = 2;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid cursor_created_at: {0}")]
    InvalidCursor(String),

    #[error("{0:#}")]
    Failure(#[source] anyhow::Error),
}

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        QueryError::Failure(err)
    }
}

/// Raw query-string parameters of the read endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageListQuery {
    pub cursor_created_at: Option<String>,
    pub ids: Option<String>,
    pub keywords: Option<String>,
}

/// Request mode, chosen by parameter precedence: ids, then keywords, then cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMode {
    Ids(Vec<String>),
    Keywords(String),
    Cursor(Option<i64>),
}

impl QueryMode {
    pub fn from_params(params: &ImageListQuery) -> Result<Self, QueryError> {
        if let Some(ids) = present(&params.ids) {
            return Ok(QueryMode::Ids(parse_ids(ids)));
        }

        if let Some(keywords) = present(&params.keywords) {
            return Ok(QueryMode::Keywords(keywords.to_string()));
        }

        let cursor = present(&params.cursor_created_at)
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| QueryError::InvalidCursor(raw.to_string()))
            })
            .transpose()?;

        Ok(QueryMode::Cursor(cursor))
    }
}

fn present(param: &Option<String>) -> Option<&str> {
    param.as_deref().map(str::trim).filter(|p| !p.is_empty())
}

/// Split a comma-separated id list, dropping blanks and repeats
fn parse_ids(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(*id))
        .map(String::from)
        .collect()
}

/// Response body of the read endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageListResponse {
    pub items: Vec<PublicImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor_created_at: Option<String>,
}

impl ImageListResponse {
    fn items_only(items: Vec<PublicImage>) -> Self {
        Self {
            items,
            has_more: None,
            next_cursor_created_at: None,
        }
    }
}

/// Settings of the read path for one deployment
#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// Source of entries served to id lookups
    pub source: Source,
    pub public_media_base: String,
    pub page_size: usize,
    pub max_batch_ids: usize,
    pub max_search_hits: usize,
}

/// Read-only service over the catalog store and search index
pub struct CatalogQueryService {
    catalog: Arc<dyn CatalogStore>,
    search: Arc<dyn SearchIndex>,
    settings: QuerySettings,
}

impl CatalogQueryService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        search: Arc<dyn SearchIndex>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            catalog,
            search,
            settings,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    /// Answer a read request
    #[instrument(skip(self))]
    pub async fn execute(&self, mode: QueryMode) -> Result<ImageListResponse, QueryError> {
        match mode {
            QueryMode::Ids(ids) => self.by_ids(ids).await,
            QueryMode::Keywords(keywords) => self.by_keywords(&keywords).await,
            QueryMode::Cursor(cursor) => self.list(cursor).await,
        }
    }

    async fn by_ids(&self, mut ids: Vec<String>) -> Result<ImageListResponse, QueryError> {
        ids.truncate(self.settings.max_batch_ids);
        let entries = self.fetch(&ids).await?;
        Ok(ImageListResponse::items_only(self.publish(&entries)))
    }

    async fn by_keywords(&self, keywords: &str) -> Result<ImageListResponse, QueryError> {
        let hits = self
            .search
            .fuzzy_search(
                &SEARCH_FIELDS,
                keywords,
                MAX_EDIT_DISTANCE,
                self.settings.max_search_hits,
            )
            .await?;

        let mut seen = HashSet::new();
        let mut ids: Vec<String> = hits.into_iter().filter(|id| seen.insert(id.clone())).collect();
        ids.truncate(self.settings.max_batch_ids);

        debug!(hits = ids.len(), "Keyword search matched");

        let entries = self.fetch(&ids).await?;
        Ok(ImageListResponse::items_only(self.publish(&entries)))
    }

    async fn list(&self, cursor: Option<i64>) -> Result<ImageListResponse, QueryError> {
        let page = self
            .catalog
            .query_processed(cursor, self.settings.page_size)
            .await
            .context("Failed to list processed entries")?;

        let next_cursor_created_at = if page.has_more {
            page.entries.last().map(|e| e.created_at.to_string())
        } else {
            None
        };

        Ok(ImageListResponse {
            items: self.publish(&page.entries),
            has_more: Some(page.has_more),
            next_cursor_created_at,
        })
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<CatalogEntry>, QueryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.catalog.batch_get(self.settings.source, ids).await?)
    }

    fn publish(&self, entries: &[CatalogEntry]) -> Vec<PublicImage> {
        entries
            .iter()
            .map(|e| PublicImage::from_entry(e, &self.settings.public_media_base))
            .collect()
    }
}
