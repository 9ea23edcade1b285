//! Persistence writer: blobs first, catalog row last.
//!
//! A catalog row is only written once both blobs it depends on exist, so
//! readers never see an entry pointing at a missing object.

use crate::error::{IngestError, Stage};
use crate::media::AnnotatedMedia;
use lgtm_catalog::blob_store::content_type_for;
use lgtm_catalog::model::{original_blob_key, processed_blob_key};
use lgtm_catalog::{BlobLocation, BlobStore, CatalogEntry, CatalogStore};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Where both blobs of one item were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub processed: BlobLocation,
    pub original: BlobLocation,
}

pub struct PersistenceWriter {
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogStore>,
    namespace: String,
}

impl PersistenceWriter {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogStore>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            blobs,
            catalog,
            namespace: namespace.into(),
        }
    }

    /// Write the processed media, then the retained original frame.
    #[instrument(skip(self, media), fields(kind = media.kind.extension()))]
    pub async fn write_blobs(
        &self,
        id: &str,
        media: &AnnotatedMedia,
    ) -> Result<StoredMedia, IngestError> {
        let processed_key = processed_blob_key(&self.namespace, id, media.kind.extension());
        let processed = self
            .blobs
            .put(&processed_key, media.processed.clone(), media.kind.content_type())
            .await
            .map_err(|e| IngestError::dependency(Stage::BlobStore, e))?;

        let original = self
            .blobs
            .put(
                &original_blob_key(&self.namespace, id),
                media.original.clone(),
                content_type_for("jpg"),
            )
            .await
            .map_err(|e| IngestError::dependency(Stage::BlobStore, e))?;

        debug!(processed = %processed, original = %original, "Blobs written");
        Ok(StoredMedia { processed, original })
    }

    /// Write the catalog row. Call only after [`write_blobs`](Self::write_blobs) succeeded.
    pub async fn write_entry(&self, entry: &CatalogEntry) -> Result<(), IngestError> {
        self.catalog
            .put(entry)
            .await
            .map_err(|e| IngestError::dependency(Stage::CatalogStore, e))
    }
}
