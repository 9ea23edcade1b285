//! LGTM ingest job.
//!
//! Searches the configured provider for each keyword and ingests every new
//! result. Keywords come from the command line, falling back to
//! `pipeline.keywords` in the configuration.

use anyhow::Context;
use futures::stream::{self, StreamExt};
use lgtm_catalog::{PgCatalogStore, S3BlobStore};
use lgtm_ingest::config::{IngestConfig, LoggingConfig};
use lgtm_ingest::{
    HttpImageSource, IngestPipeline, IngestReport, PipelineDeps, RekognitionDetector,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = IngestConfig::load().context("Failed to load configuration")?;

    init_logging(&config.logging)?;

    info!(
        service = "lgtm-ingest",
        version = env!("CARGO_PKG_VERSION"),
        source = %config.pipeline.source,
        "Starting ingest run"
    );

    config.validate()?;

    let keywords: Vec<String> = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            config.pipeline.keywords.clone()
        } else {
            args
        }
    };
    if keywords.is_empty() {
        anyhow::bail!("No keywords given on the command line or in pipeline.keywords");
    }

    let pipeline = Arc::new(build_pipeline(&config).await?);
    let source = config.pipeline.source;

    let results: Vec<(String, Result<IngestReport, lgtm_ingest::IngestError>)> =
        stream::iter(keywords)
            .map(|keyword| {
                let pipeline = pipeline.clone();
                async move {
                    let result = pipeline.run(source, &keyword).await;
                    (keyword, result)
                }
            })
            .buffer_unordered(config.pipeline.keyword_concurrency)
            .collect()
            .await;

    let mut total = IngestReport::default();
    let mut aborted = 0usize;
    for (keyword, result) in results {
        match result {
            Ok(report) => {
                total.candidates += report.candidates;
                total.processed += report.processed;
                total.skipped += report.skipped;
                total.failed += report.failed;
            }
            Err(e) => {
                aborted += 1;
                error!(keyword = %keyword, error = %e, "Keyword run aborted");
            }
        }
    }

    info!(
        candidates = total.candidates,
        processed = total.processed,
        skipped = total.skipped,
        failed = total.failed,
        aborted_keywords = aborted,
        "Ingest run complete"
    );

    if aborted > 0 {
        warn!(aborted_keywords = aborted, "Some keyword runs did not finish");
    }

    Ok(())
}

/// Construct the process-wide clients once and wire them into a pipeline.
async fn build_pipeline(config: &IngestConfig) -> anyhow::Result<IngestPipeline> {
    let catalog = Arc::new(
        PgCatalogStore::new(&config.database)
            .await
            .context("Failed to initialize catalog store")?,
    );
    let blobs = Arc::new(
        S3BlobStore::new(&config.s3)
            .await
            .context("Failed to initialize blob store")?,
    );
    let http = Arc::new(HttpImageSource::new(config.sources.clone())?);
    let detector = Arc::new(RekognitionDetector::new(&config.recognition.region).await);

    Ok(IngestPipeline::new(PipelineDeps {
        source: http.clone(),
        fetcher: http,
        catalog,
        blobs,
        detector,
        namespace: config.s3.namespace.clone(),
    }))
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level")?;

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}
