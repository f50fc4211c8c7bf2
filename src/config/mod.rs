//! Configuration module for the crawler
//!
//! This module handles loading, parsing, and validating crawl configuration,
//! either from a TOML file or from an actor-style JSON input document.
//!
//! # Example
//!
//! ```no_run
//! use bluesky_crawler::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Crawling {} queries", config.crawl.queries.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AuthConfig, Config, CrawlConfig, CrawlMode, OutputConfig, OutputFormat, RetryAccounting,
    RetryConfig, SearchSort,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, ActorInput};
pub use validation::validate;
