use crate::config::types::{
    default_concurrency, default_page_size, default_request_timeout, default_service_url,
    AuthConfig, Config, CrawlConfig, CrawlMode, OutputConfig, OutputFormat, RetryAccounting,
    RetryConfig,
};
use crate::config::validation::validate;
use crate::ConfigError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Actor-style JSON input document
///
/// Keys follow the camelCase input schema of the hosted actor. The
/// historical `indentifier` spelling is accepted for the account identifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorInput {
    #[serde(alias = "indentifier", default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub app_password: Option<String>,

    #[serde(default)]
    pub max_requests_per_crawl: Option<u64>,

    #[serde(default)]
    pub queries: Option<Vec<String>>,

    #[serde(default)]
    pub mode: Option<CrawlMode>,

    #[serde(default)]
    pub concurrency: Option<u32>,

    #[serde(default)]
    pub output_path: Option<String>,

    #[serde(default)]
    pub output_format: Option<OutputFormat>,
}

impl ActorInput {
    /// Converts the input document into a full configuration
    ///
    /// Required keys are checked here so a missing key is reported by name.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let identifier = self
            .identifier
            .ok_or_else(|| ConfigError::Validation("identifier is required".to_string()))?;
        let app_password = self
            .app_password
            .ok_or_else(|| ConfigError::Validation("appPassword is required".to_string()))?;
        let queries = self
            .queries
            .ok_or_else(|| ConfigError::Validation("queries is required".to_string()))?;
        let mode = self
            .mode
            .ok_or_else(|| ConfigError::Validation("mode is required".to_string()))?;

        let format = self.output_format.unwrap_or_default();
        let path = self.output_path.unwrap_or_else(|| match format {
            OutputFormat::Jsonl => format!("{}.jsonl", mode),
            OutputFormat::Sqlite => "dataset.db".to_string(),
        });

        Ok(Config {
            auth: AuthConfig {
                identifier,
                app_password,
                service_url: default_service_url(),
            },
            crawl: CrawlConfig {
                queries,
                mode,
                max_requests_per_crawl: self.max_requests_per_crawl,
                concurrency: self.concurrency.unwrap_or_else(default_concurrency),
                page_size: default_page_size(),
                request_timeout_secs: default_request_timeout(),
                retry_accounting: RetryAccounting::default(),
                enrich_profiles: false,
                sort: None,
            },
            retry: RetryConfig::default(),
            output: OutputConfig {
                path,
                format,
                report_path: None,
            },
        })
    }
}

/// Loads and parses a configuration file from the given path
///
/// Files ending in `.json` are read as actor input documents, anything else
/// as TOML.
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config = if is_json {
        let input: ActorInput = serde_json::from_str(&content)?;
        input.into_config()?
    } else {
        toml::from_str::<Config>(&content)?
    };

    validate(&config)?;

    if config.crawl.max_requests_per_crawl == Some(0) {
        tracing::warn!(
            "max-requests-per-crawl is 0: no search requests will be issued (omit it for an unlimited crawl)"
        );
    }

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash identifies the configuration in logs and in the run record.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
