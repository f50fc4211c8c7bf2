//! bluesky-crawler main entry point
//!
//! This is the command-line interface for the Bluesky topic crawler.

use anyhow::Context;
use bluesky_crawler::config::{load_config_with_hash, Config, OutputFormat};
use bluesky_crawler::output::print_report;
use bluesky_crawler::{Coordinator, CrawlError, CrawlReport, StopReason};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_BUDGET_EXHAUSTED: u8 = 3;
const EXIT_CANCELLED: u8 = 4;

/// bluesky-crawler: topic-driven Bluesky search crawler
///
/// Pages through post search results for each configured query and writes
/// deduplicated post or author records, staying within a request budget.
#[derive(Parser, Debug)]
#[command(name = "bluesky-crawler")]
#[command(version)]
#[command(about = "Topic-driven Bluesky search crawler", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (or actor-style JSON input)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,

    /// Write records here instead of the configured output path
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Write the run report as JSON to this path
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Some(path) = &cli.output {
        config.output.path = path.display().to_string();
    }
    if let Some(path) = &cli.report {
        config.output.report_path = Some(path.display().to_string());
    }

    if cli.dry_run {
        print_dry_run(&config);
        return ExitCode::SUCCESS;
    }

    let report_path = config.output.report_path.clone();
    let report = match handle_crawl(config, &config_hash).await {
        Ok(report) => report,
        Err(e) if e.is_config() => {
            tracing::error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if !cli.quiet {
        print_report(&report);
    }

    if let Some(path) = report_path {
        if let Err(e) = write_report(&report, &path) {
            tracing::error!("{:#}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    }

    match report.status {
        StopReason::Completed => ExitCode::SUCCESS,
        StopReason::BudgetExhausted => ExitCode::from(EXIT_BUDGET_EXHAUSTED),
        StopReason::Cancelled => ExitCode::from(EXIT_CANCELLED),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` overrides the verbosity flags when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        match verbose {
            0 => EnvFilter::new("bluesky_crawler=info,warn"),
            1 => EnvFilter::new("bluesky_crawler=debug,info"),
            2 => EnvFilter::new("bluesky_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs the crawl, cancelling it on Ctrl-C
async fn handle_crawl(config: Config, config_hash: &str) -> Result<CrawlReport, CrawlError> {
    let coordinator = Coordinator::from_config(config, config_hash)?;

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight requests");
            cancel.cancel();
        }
    });

    coordinator.run().await
}

fn write_report(report: &CrawlReport, path: &str) -> anyhow::Result<()> {
    report
        .write_json(path.as_ref())
        .with_context(|| format!("Failed to write report to {}", path))?;
    tracing::info!("Report written to {}", path);
    Ok(())
}

/// Handles the --dry-run mode: shows what would be crawled
fn print_dry_run(config: &Config) {
    println!("=== bluesky-crawler Dry Run ===\n");

    println!("Account:");
    println!("  Identifier: {}", config.auth.identifier);
    println!("  Service: {}", config.auth.service_url);

    println!("\nCrawl:");
    println!("  Mode: {}", config.crawl.mode);
    match config.crawl.max_requests_per_crawl {
        Some(limit) => println!("  Request budget: {}", limit),
        None => println!("  Request budget: unlimited"),
    }
    println!("  Concurrency: {}", config.crawl.concurrency);
    println!("  Page size: {}", config.crawl.page_size);
    if let Some(sort) = config.crawl.sort {
        println!("  Sort: {}", sort.as_str());
    }
    if config.crawl.enrich_profiles {
        println!("  Profile enrichment: on");
    }

    println!("\nQueries ({}):", config.crawl.queries.len());
    for query in &config.crawl.queries {
        println!("  - {:?}", query);
    }

    println!("\nOutput:");
    let format = match config.output.format {
        OutputFormat::Jsonl => "JSON Lines",
        OutputFormat::Sqlite => "SQLite",
    };
    println!("  Records: {} ({})", config.output.path, format);
    if let Some(report) = &config.output.report_path {
        println!("  Report: {}", report);
    }

    println!("\n✓ Configuration is valid");
}
