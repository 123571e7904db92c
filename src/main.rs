use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bulk_indexer::config::Config;
use bulk_indexer::indexer::Indexer;
use bulk_indexer::ingest::{self, AppState};
use bulk_indexer::metrics;
use bulk_indexer::store::{self, HttpBulkStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting bulk indexer service");

    let config = Config::from_env()?;
    info!(service = %config.service_name, "Configuration loaded");

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::init_metrics(metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });
    info!("Metrics server started on port {}", metrics_port);

    let store: Arc<dyn store::BulkStore> = Arc::new(HttpBulkStore::new(&config.store_base_url));
    let indexer = Indexer::new(store, config.indexer_config());
    info!("Indexer initialized");

    let app_state = AppState {
        indexer: indexer.clone(),
        expected_access_key: config.firehose_access_key.clone(),
        dataset: config.firehose_dataset.clone(),
    };
    let app = ingest::router(app_state);

    let listen_addr = format!("{}:{}", config.http_listen_addr, config.http_listen_port);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("Ingestion endpoint listening on http://{}", listen_addr);

    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            if let Err(e) = result {
                error!("Ingestion server panicked: {}", e);
            }
        }
    }

    info!("Shutting down gracefully...");

    match indexer.close(CancellationToken::new()).await {
        Ok(()) => {
            let stats = indexer.stats();
            info!(
                added = stats.added,
                failed = stats.failed,
                "Indexer closed cleanly"
            );
        }
        Err(e) => error!("Indexer close reported an error: {}", e),
    }

    info!("Bulk indexer service stopped");
    Ok(())
}
