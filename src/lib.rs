//! Bluesky topic crawler
//!
//! This crate pages through the Bluesky post search API for a list of text
//! queries and emits a deduplicated stream of post records or author records,
//! while respecting a global request budget.

pub mod api;
pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl CrawlError {
    /// Whether this error happened before any network activity
    pub fn is_config(&self) -> bool {
        matches!(self, CrawlError::Config(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse JSON input: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, CrawlMode};
pub use crawler::{crawl, CancelHandle, Coordinator};
pub use output::{CrawlReport, NormalizedRecord, StopReason};
