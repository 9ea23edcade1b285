//! Deduplication gate.
//!
//! A point lookup by `(id, source)` before any expensive work. The check is
//! not atomic with the later catalog write; two concurrent runs may both
//! see `Proceed` for the same item, in which case the second catalog write
//! overwrites the first with equivalent content and keeps its `created_at`.

use crate::error::{IngestError, Stage};
use lgtm_catalog::{CandidateItem, CatalogStore};
use std::sync::Arc;
use tracing::debug;

/// Outcome of the dedup check for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    Proceed,
    Skip { reason: String },
}

pub struct DedupGate {
    catalog: Arc<dyn CatalogStore>,
}

impl DedupGate {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    pub async fn check(&self, item: &CandidateItem) -> Result<DedupDecision, IngestError> {
        let existing = self
            .catalog
            .get(&item.identifier, item.source)
            .await
            .map_err(|e| IngestError::dependency(Stage::CatalogStore, e))?;

        match existing {
            Some(entry) => {
                debug!(id = %entry.id, source = %entry.source, "Already cataloged");
                Ok(DedupDecision::Skip {
                    reason: format!("already processed at {}", entry.created_at),
                })
            }
            None => Ok(DedupDecision::Proceed),
        }
    }
}
