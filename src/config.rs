use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::indexer::IndexerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Service configuration
    pub service_name: String,
    pub metrics_port: u16,

    // HTTP ingestion configuration (C5)
    pub http_listen_addr: String,
    pub http_listen_port: u16,
    pub firehose_access_key: String,
    pub firehose_dataset: String,

    // Document store configuration
    pub store_base_url: String,
    pub store_credential: String,

    // Indexer tuning (C3)
    pub max_requests: usize,
    pub flush_bytes: usize,
    pub flush_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Config {
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "bulk-indexer".to_string()),

            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()?,

            // HTTP ingestion configuration
            http_listen_addr: env::var("HTTP_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),

            http_listen_port: env::var("HTTP_LISTEN_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,

            firehose_access_key: env::var("FIREHOSE_ACCESS_KEY")
                .unwrap_or_else(|_| String::new()),

            firehose_dataset: env::var("FIREHOSE_DATASET")
                .unwrap_or_else(|_| "default".to_string()),

            // Document store configuration
            store_base_url: env::var("STORE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9200".to_string()),

            store_credential: env::var("STORE_CREDENTIAL")
                .unwrap_or_else(|_| String::new()),

            // Indexer tuning
            max_requests: env::var("MAX_REQUESTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            flush_bytes: env::var("FLUSH_BYTES")
                .unwrap_or_else(|_| (5 * 1024 * 1024).to_string())
                .parse()?,

            flush_interval_seconds: env::var("FLUSH_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
        })
    }

    /// Builds the [`IndexerConfig`] this service's single [`crate::indexer::Indexer`] runs with.
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            max_requests: self.max_requests,
            flush_bytes: self.flush_bytes,
            flush_interval: Duration::from_secs(self.flush_interval_seconds),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "bulk-indexer".to_string(),
            metrics_port: 9090,
            http_listen_addr: "0.0.0.0".to_string(),
            http_listen_port: 8080,
            firehose_access_key: String::new(),
            firehose_dataset: "default".to_string(),
            store_base_url: "http://localhost:9200".to_string(),
            store_credential: String::new(),
            max_requests: 10,
            flush_bytes: 5 * 1024 * 1024,
            flush_interval_seconds: 30,
        }
    }
}
