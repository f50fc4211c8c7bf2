use crate::config::types::{AuthConfig, Config, CrawlConfig, OutputConfig, RetryConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_auth_config(&config.auth)?;
    validate_crawl_config(&config.crawl)?;
    validate_retry_config(&config.retry)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates credentials and the service URL
fn validate_auth_config(config: &AuthConfig) -> Result<(), ConfigError> {
    if config.identifier.trim().is_empty() {
        return Err(ConfigError::Validation(
            "identifier cannot be empty".to_string(),
        ));
    }

    if config.app_password.trim().is_empty() {
        return Err(ConfigError::Validation(
            "app-password cannot be empty".to_string(),
        ));
    }

    let url = Url::parse(&config.service_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid service-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "service-url '{}' must use http or https",
            config.service_url
        )));
    }

    Ok(())
}

/// Validates crawl configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.queries.is_empty() {
        return Err(ConfigError::Validation(
            "queries must contain at least one query".to_string(),
        ));
    }

    if let Some(position) = config.queries.iter().position(|q| q.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "query #{} is blank",
            position + 1
        )));
    }

    if config.concurrency < 1 || config.concurrency > 30 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 30, got {}",
            config.concurrency
        )));
    }

    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry limits
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "max-attempts must be >= 1".to_string(),
        ));
    }

    if config.max_auth_attempts == 0 {
        return Err(ConfigError::Validation(
            "max-auth-attempts must be >= 1".to_string(),
        ));
    }

    if config.initial_backoff_ms > config.max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "initial-backoff-ms ({}) cannot exceed max-backoff-ms ({})",
            config.initial_backoff_ms, config.max_backoff_ms
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output path cannot be empty".to_string(),
        ));
    }

    if let Some(report) = &config.report_path {
        if report.trim().is_empty() {
            return Err(ConfigError::Validation(
                "report-path cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}
