//! LGTM Catalog Service
//!
//! Read side of the LGTM image catalog. The service serves processed images
//! to web clients and keeps the keyword search index in step with the
//! catalog by consuming its change stream.
//!
//! ## Features
//!
//! - **Cursor Listing**: newest-first pages of processed entries keyed by
//!   `created_at`, stable under concurrent inserts
//! - **Batch Lookup**: fetch entries by a comma-separated id list
//! - **Fuzzy Search**: edit-distance-2 matching on keywords and labels via
//!   OpenSearch, resolved back to catalog entries
//! - **Search Sync**: idempotent upserts/deletes projected from catalog
//!   change records
//!
//! The storage capabilities (`CatalogStore`, `BlobStore`, `SearchIndex`) are
//! also used by the ingest pipeline.
//!
//! ## Architecture
//!
//! ```text
//!   Web client                       Kafka change stream
//!       │                                    │
//!       ▼                                    ▼
//! ┌──────────────┐                   ┌──────────────┐
//! │ Query API    │                   │ Search       │
//! │ (axum)       │                   │ Synchronizer │
//! └──────────────┘                   └──────────────┘
//!    │        │                              │
//!    ▼        ▼                              ▼
//! ┌────────┐ ┌──────────────┐        ┌──────────────┐
//! │Postgres│ │ OpenSearch   │◀───────│ upsert /     │
//! │catalog │ │ (fuzzy ids)  │        │ delete docs  │
//! └────────┘ └──────────────┘        └──────────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod catalog_store;
pub mod config;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod model;
pub mod query;
pub mod search_index;
pub mod search_sync;

pub use api::{AppState, CorsPolicy};
pub use blob_store::{BlobLocation, BlobStore, S3BlobStore};
pub use catalog_store::{CatalogPage, CatalogStore, PgCatalogStore};
pub use config::Config;
pub use model::{CandidateItem, CatalogEntry, CreatedAtClock, EntryStatus, PublicImage, Source};
pub use query::{CatalogQueryService, ImageListResponse, QueryError, QueryMode, QuerySettings};
pub use search_index::{OpenSearchIndex, RequestSigner, SearchDocument, SearchIndex};
pub use search_sync::{ChangeRecord, ChangeStreamConsumer, SearchSynchronizer, SyncReport};
