//! Error taxonomy for the ingestion pipeline.
//!
//! `SourceUnavailable` aborts a whole keyword run. Every other variant is
//! scoped to a single candidate item: the item is skipped and the run
//! continues with the next candidate.

use lgtm_catalog::Source;
use std::fmt;
use thiserror::Error;

/// External dependency a pipeline stage talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    BlobStore,
    Recognition,
    CatalogStore,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "media fetch",
            Stage::BlobStore => "blob store",
            Stage::Recognition => "recognition service",
            Stage::CatalogStore => "catalog store",
        };
        f.write_str(name)
    }
}

/// Errors raised while ingesting candidate items.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{provider} search unavailable: {message}")]
    SourceUnavailable { provider: Source, message: String },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("annotation failed: {0}")]
    Annotation(String),

    #[error("{stage} failed: {source}")]
    DependencyFailure {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl IngestError {
    pub fn dependency(stage: Stage, source: anyhow::Error) -> Self {
        IngestError::DependencyFailure { stage, source }
    }

    /// Whether the error only affects the current item.
    pub fn is_item_scoped(&self) -> bool {
        !matches!(self, IngestError::SourceUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_scope() {
        let unavailable = IngestError::SourceUnavailable {
            provider: Source::Giphy,
            message: "HTTP 429".to_string(),
        };
        assert!(!unavailable.is_item_scoped());
        assert_eq!(unavailable.to_string(), "giphy search unavailable: HTTP 429");

        let dependency = IngestError::dependency(Stage::BlobStore, anyhow::anyhow!("timeout"));
        assert!(dependency.is_item_scoped());
        assert_eq!(dependency.to_string(), "blob store failed: timeout");

        assert!(IngestError::UnsupportedMediaType("bmp".to_string()).is_item_scoped());
    }
}
