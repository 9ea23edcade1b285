use anyhow::{Context, Result};
use lgtm_catalog::api::{start_api_server, AppState};
use lgtm_catalog::config::Config;
use lgtm_catalog::search_index::{SigV4Signer, UnsignedTransport};
use lgtm_catalog::{
    CatalogQueryService, ChangeStreamConsumer, OpenSearchIndex, PgCatalogStore, QuerySettings,
    RequestSigner, SearchSynchronizer,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting LGTM catalog service");

    init_metrics(config.service.metrics_port)?;

    let catalog = Arc::new(
        PgCatalogStore::new(&config.database)
            .await
            .context("Failed to initialize catalog store")?,
    );

    if config.database.run_migrations {
        catalog
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let signer: Arc<dyn RequestSigner> = if config.search.sign_requests {
        Arc::new(
            SigV4Signer::from_env(&config.search.region)
                .await
                .context("Failed to initialize request signer")?,
        )
    } else {
        Arc::new(UnsignedTransport)
    };
    let search_index = Arc::new(OpenSearchIndex::new(&config.search, signer));

    let query = CatalogQueryService::new(
        catalog.clone(),
        search_index.clone(),
        QuerySettings {
            source: config.api.source,
            public_media_base: config.api.public_media_base.clone(),
            page_size: config.api.page_size,
            max_batch_ids: config.api.max_batch_ids,
            max_search_hits: config.search.max_hits,
        },
    );

    let synchronizer = Arc::new(SearchSynchronizer::new(search_index));
    let change_consumer = ChangeStreamConsumer::new(&config.kafka, synchronizer)
        .context("Failed to initialize change stream consumer")?;

    let shutdown = CancellationToken::new();

    let consumer_shutdown = shutdown.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = change_consumer.run(consumer_shutdown).await {
            error!(error = %e, "Change stream consumer error");
        }
    });

    let api_state = AppState {
        query: Arc::new(query),
    };
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Catalog service started successfully");

    shutdown_signal().await;

    info!("Shutting down catalog service");

    shutdown.cancel();
    api_handle.abort();
    if let Err(e) = consumer_handle.await {
        error!(error = %e, "Change stream consumer task failed");
    }

    info!("Catalog service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
