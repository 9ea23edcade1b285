//! LGTM Ingest
//!
//! Write side of the LGTM image catalog. A run searches an image provider
//! for a keyword, captions every new result with a two-layer "LGTM"
//! overlay, stores the processed media and the original frame, extracts
//! labels from the original, and records a catalog entry.
//!
//! ## Architecture
//!
//! ```text
//!  Unsplash / Giphy
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ ImageSource  │──▶│ DedupGate    │──▶│ MediaFetcher │
//! │ (paged HTTP) │   │ (catalog get)│   │              │
//! └──────────────┘   └──────────────┘   └──────────────┘
//!                                              │
//!                                              ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ catalog row  │◀──│ Rekognition  │◀──│ annotate +   │
//! │ (Postgres)   │   │ labels > 80  │   │ blobs (S3)   │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```

pub mod animation;
pub mod caption;
pub mod config;
pub mod dedup;
pub mod error;
pub mod labels;
pub mod media;
pub mod persistence;
pub mod pipeline;
pub mod source;

pub use config::IngestConfig;
pub use dedup::{DedupDecision, DedupGate};
pub use error::{IngestError, Stage};
pub use labels::{LabelDetector, LabelExtractor, RekognitionDetector};
pub use media::{AnnotatedMedia, MediaKind, MediaVariant};
pub use persistence::{PersistenceWriter, StoredMedia};
pub use pipeline::{IngestPipeline, IngestReport, ItemOutcome, PipelineDeps};
pub use source::{HttpImageSource, ImageSource, MediaFetcher};
