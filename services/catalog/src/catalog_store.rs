use crate::config::DatabaseConfig;
use crate::model::{CatalogEntry, EntryStatus, Source};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

/// One page of a cursor listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPage {
    /// Entries ordered by `created_at` descending
    pub entries: Vec<CatalogEntry>,
    /// True iff a processed entry older than the last returned one exists
    pub has_more: bool,
}

/// Durable catalog of processed items.
///
/// `put` is last-writer-wins on every attribute except `created_at`, which
/// keeps the value of the first write for a given `(id, source)`.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Point lookup by primary key
    async fn get(&self, id: &str, source: Source) -> Result<Option<CatalogEntry>>;

    /// Idempotent upsert
    async fn put(&self, entry: &CatalogEntry) -> Result<()>;

    /// Fetch every existing entry among `ids` for one source, in no particular order
    async fn batch_get(&self, source: Source, ids: &[String]) -> Result<Vec<CatalogEntry>>;

    /// Processed entries with `created_at < before` (all if `None`), newest first
    async fn query_processed(&self, before: Option<i64>, limit: usize) -> Result<CatalogPage>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct CatalogRow {
    id: String,
    source: String,
    origin_url: String,
    blob_key: String,
    search_keyword: String,
    labels: Vec<String>,
    status: String,
    created_at: i64,
}

impl TryFrom<CatalogRow> for CatalogEntry {
    type Error = anyhow::Error;

    fn try_from(row: CatalogRow) -> Result<Self> {
        Ok(Self {
            source: row.source.parse()?,
            status: row.status.parse()?,
            id: row.id,
            origin_url: row.origin_url,
            blob_key: row.blob_key,
            search_keyword: row.search_keyword,
            labels: row.labels.into_iter().collect::<BTreeSet<_>>(),
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, source, origin_url, blob_key, search_keyword,
           labels, status, created_at
    FROM catalog_entries
"#;

/// Catalog store backed by PostgreSQL
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Create a new catalog store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to catalog database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running catalog migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Catalog migrations completed");
        Ok(())
    }

    async fn exists_processed_before(&self, before: i64) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM catalog_entries
                WHERE status = $1 AND created_at < $2
            )
            "#,
        )
        .bind(EntryStatus::Processed.as_str())
        .bind(before)
        .fetch_one(&self.pool)
        .await
        .context("Failed to probe for older entries")?;

        Ok(exists)
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn get(&self, id: &str, source: Source) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query_as::<_, CatalogRow>(&format!(
            "{SELECT_COLUMNS} WHERE id = $1 AND source = $2"
        ))
        .bind(id)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query catalog entry")?;

        row.map(CatalogEntry::try_from).transpose()
    }

    #[instrument(skip(self, entry), fields(id = %entry.id, source = %entry.source))]
    async fn put(&self, entry: &CatalogEntry) -> Result<()> {
        let labels: Vec<&str> = entry.labels.iter().map(String::as_str).collect();

        sqlx::query(
            r#"
            INSERT INTO catalog_entries (
                id, source, origin_url, blob_key, search_keyword,
                labels, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id, source) DO UPDATE SET
                origin_url = EXCLUDED.origin_url,
                blob_key = EXCLUDED.blob_key,
                search_keyword = EXCLUDED.search_keyword,
                labels = EXCLUDED.labels,
                status = EXCLUDED.status
            "#,
        )
        .bind(&entry.id)
        .bind(entry.source.as_str())
        .bind(&entry.origin_url)
        .bind(&entry.blob_key)
        .bind(&entry.search_keyword)
        .bind(&labels)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to write catalog entry")?;

        debug!(blob_key = %entry.blob_key, "Catalog entry written");
        Ok(())
    }

    async fn batch_get(&self, source: Source, ids: &[String]) -> Result<Vec<CatalogEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, CatalogRow>(&format!(
            "{SELECT_COLUMNS} WHERE source = $1 AND id = ANY($2)"
        ))
        .bind(source.as_str())
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to batch-read catalog entries")?;

        rows.into_iter().map(CatalogEntry::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn query_processed(&self, before: Option<i64>, limit: usize) -> Result<CatalogPage> {
        let rows = sqlx::query_as::<_, CatalogRow>(&format!(
            r#"{SELECT_COLUMNS}
            WHERE status = $1 AND ($2::BIGINT IS NULL OR created_at < $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(EntryStatus::Processed.as_str())
        .bind(before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query processed entries")?;

        let entries = rows
            .into_iter()
            .map(CatalogEntry::try_from)
            .collect::<Result<Vec<_>>>()?;

        // A full page only has more if something strictly older exists;
        // ties with the last entry are unreachable through the cursor.
        let has_more = match entries.last() {
            Some(last) if entries.len() == limit => {
                self.exists_processed_before(last.created_at).await?
            }
            _ => false,
        };

        Ok(CatalogPage { entries, has_more })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Catalog database unreachable")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(source: &str, status: &str) -> CatalogRow {
        CatalogRow {
            id: "g1".to_string(),
            source: source.to_string(),
            origin_url: "https://example/g1.gif".to_string(),
            blob_key: "lgtm/g1.gif".to_string(),
            search_keyword: "lgtm".to_string(),
            labels: vec!["Dog".to_string(), "Dog".to_string(), "Animal".to_string()],
            status: status.to_string(),
            created_at: 42,
        }
    }

    #[test]
    fn test_row_conversion() {
        let entry = CatalogEntry::try_from(row("giphy", "processed")).unwrap();
        assert_eq!(entry.source, Source::Giphy);
        assert_eq!(entry.status, EntryStatus::Processed);
        assert_eq!(entry.labels.len(), 2);
        assert_eq!(entry.created_at, 42);
    }

    #[test]
    fn test_row_conversion_rejects_unknown_values() {
        assert!(CatalogEntry::try_from(row("flickr", "processed")).is_err());
        assert!(CatalogEntry::try_from(row("giphy", "pending")).is_err());
    }
}
