//! Ingestion pipeline driver.
//!
//! For one `(source, keyword)` run, candidates are processed sequentially:
//!
//! ```text
//! ImageSource -> DedupGate -> fetch -> annotate -> blobs -> labels -> catalog row
//! ```
//!
//! Item-scoped failures are logged and the run moves on to the next
//! candidate. A provider failure ends the run.

use crate::dedup::{DedupDecision, DedupGate};
use crate::error::{IngestError, Stage};
use crate::labels::{LabelDetector, LabelExtractor};
use crate::media;
use crate::persistence::PersistenceWriter;
use crate::source::{ImageSource, MediaFetcher};
use futures::StreamExt;
use lgtm_catalog::{
    BlobStore, CandidateItem, CatalogEntry, CatalogStore, CreatedAtClock, EntryStatus, Source,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Capabilities the pipeline is built from.
pub struct PipelineDeps {
    pub source: Arc<dyn ImageSource>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub catalog: Arc<dyn CatalogStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub detector: Arc<dyn LabelDetector>,
    /// Key prefix for every blob written
    pub namespace: String,
}

/// What happened to a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Processed(CatalogEntry),
    Skipped { reason: String },
}

/// Counters for one keyword run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub candidates: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct IngestPipeline {
    source: Arc<dyn ImageSource>,
    fetcher: Arc<dyn MediaFetcher>,
    dedup: DedupGate,
    writer: PersistenceWriter,
    labels: LabelExtractor,
    clock: CreatedAtClock,
}

impl IngestPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            source: deps.source,
            fetcher: deps.fetcher,
            dedup: DedupGate::new(deps.catalog.clone()),
            writer: PersistenceWriter::new(deps.blobs, deps.catalog, deps.namespace),
            labels: LabelExtractor::new(deps.detector),
            clock: CreatedAtClock::new(),
        }
    }

    /// Search `keyword` on `source` and ingest every new candidate.
    #[instrument(skip(self))]
    pub async fn run(&self, source: Source, keyword: &str) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();
        let mut candidates = self.source.candidates(source, keyword);

        while let Some(next) = candidates.next().await {
            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    warn!(error = %e, report = ?report, "Candidate stream aborted");
                    return Err(e);
                }
            };
            report.candidates += 1;

            match self.process_item(&item).await {
                Ok(ItemOutcome::Processed(entry)) => {
                    report.processed += 1;
                    info!(
                        id = %entry.id,
                        source = %entry.source,
                        labels = entry.labels.len(),
                        "Item cataloged"
                    );
                }
                Ok(ItemOutcome::Skipped { reason }) => {
                    report.skipped += 1;
                    info!(
                        id = %item.identifier,
                        source = %item.source,
                        reason = %reason,
                        "Item skipped"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(id = %item.identifier, source = %item.source, error = %e, "Item failed");
                }
            }
        }

        info!(
            candidates = report.candidates,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Keyword run complete"
        );
        Ok(report)
    }

    /// Run one candidate through every stage.
    ///
    /// Unsupported media is reported as a skip; dependency failures abort
    /// the item before its catalog row is written.
    pub async fn process_item(&self, item: &CandidateItem) -> Result<ItemOutcome, IngestError> {
        if let DedupDecision::Skip { reason } = self.dedup.check(item).await? {
            return Ok(ItemOutcome::Skipped { reason });
        }

        let bytes = self
            .fetcher
            .fetch(&item.origin_url)
            .await
            .map_err(|e| IngestError::dependency(Stage::Fetch, e))?;

        let annotated = match media::annotate_blocking(bytes).await {
            Ok(annotated) => annotated,
            Err(IngestError::UnsupportedMediaType(kind)) => {
                return Ok(ItemOutcome::Skipped {
                    reason: format!("unsupported media type: {kind}"),
                })
            }
            Err(e) => return Err(e),
        };
        debug!(
            id = %item.identifier,
            kind = annotated.kind.extension(),
            frames = annotated.frame_count,
            "Media annotated"
        );

        let stored = self.writer.write_blobs(&item.identifier, &annotated).await?;
        let labels = self.labels.extract(&stored.original).await?;

        let entry = CatalogEntry {
            id: item.identifier.clone(),
            source: item.source,
            origin_url: item.origin_url.clone(),
            blob_key: stored.processed.key,
            search_keyword: item.search_keyword.clone(),
            labels,
            status: EntryStatus::Processed,
            created_at: self.clock.next(),
        };
        self.writer.write_entry(&entry).await?;

        Ok(ItemOutcome::Processed(entry))
    }
}
