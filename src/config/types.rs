use serde::Deserialize;
use std::fmt;

/// Main configuration structure for a crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub output: OutputConfig,
}

/// Account credentials and the service to authenticate against
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Handle, email or DID of the account
    pub identifier: String,

    /// App password created for the account
    #[serde(rename = "app-password")]
    pub app_password: String,

    /// Entryway service used for session creation
    #[serde(rename = "service-url", default = "default_service_url")]
    pub service_url: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("identifier", &"<redacted>")
            .field("app_password", &"<redacted>")
            .field("service_url", &self.service_url)
            .finish()
    }
}

/// Which records the crawl emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// One record per matching post
    Posts,
    /// One record per distinct author of matching posts
    Users,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::Posts => "posts",
            CrawlMode::Users => "users",
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering requested from the search endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSort {
    Latest,
    Top,
}

impl SearchSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSort::Latest => "latest",
            SearchSort::Top => "top",
        }
    }
}

/// How retries of a single page are charged against the request budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryAccounting {
    /// One unit per scheduled page, retries are free
    #[default]
    Single,
    /// One unit per backoff retry as well
    PerAttempt,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Search queries, crawled round-robin
    pub queries: Vec<String>,

    /// Output record kind
    pub mode: CrawlMode,

    /// Total request budget; absent means unlimited, zero means no requests
    #[serde(rename = "max-requests-per-crawl", default)]
    pub max_requests_per_crawl: Option<u64>,

    /// Number of parallel fetch workers
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Items requested per search page
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Timeout applied to every API request (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(rename = "retry-accounting", default)]
    pub retry_accounting: RetryAccounting,

    /// Look up the full profile of every newly seen author (users mode)
    #[serde(rename = "enrich-profiles", default)]
    pub enrich_profiles: bool,

    #[serde(default)]
    pub sort: Option<SearchSort>,
}

/// Backoff and re-authentication limits
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per page fetch for retryable failures, first attempt included
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "initial-backoff-ms", default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(rename = "max-backoff-ms", default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Attempts per session creation when the auth endpoint is unreachable
    #[serde(rename = "max-auth-attempts", default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_auth_attempts: default_max_auth_attempts(),
        }
    }
}

/// Dataset format written by the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Sqlite,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path of the dataset file
    pub path: String,

    #[serde(default)]
    pub format: OutputFormat,

    /// Optional JSON run report
    #[serde(rename = "report-path", default)]
    pub report_path: Option<String>,
}

pub(crate) fn default_service_url() -> String {
    "https://bsky.social".to_string()
}

pub(crate) fn default_concurrency() -> u32 {
    10
}

pub(crate) fn default_page_size() -> u32 {
    25
}

pub(crate) fn default_request_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_max_auth_attempts() -> u32 {
    3
}
