//! Configuration module for the card sync server.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::StoreError;

/// Default number of documents per replication batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for sync authentication (optional in development)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy card index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Documents per replication batch
    pub batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("CARDSYNC_API_PSK")
            .ok()
            .filter(|psk| !psk.trim().is_empty());

        let db_path = env::var("CARDSYNC_DB_PATH")
            .unwrap_or_else(|_| "./data/cards.sqlite".to_string())
            .into();

        let index_path = env::var("CARDSYNC_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = env::var("CARDSYNC_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:5984".to_string());
        let bind_addr = bind_addr.parse().map_err(|_| {
            StoreError::Config(format!("Invalid CARDSYNC_BIND_ADDR format: {}", bind_addr))
        })?;

        let log_level = env::var("CARDSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let batch_size = match env::var("CARDSYNC_BATCH_SIZE") {
            Ok(raw) => parse_batch_size(&raw)?,
            Err(_) => DEFAULT_BATCH_SIZE,
        };

        Ok(Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            batch_size,
        })
    }
}

fn parse_batch_size(raw: &str) -> Result<usize, StoreError> {
    match raw.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(StoreError::Config(format!(
            "Invalid CARDSYNC_BATCH_SIZE: {}",
            raw
        ))),
    }
}
