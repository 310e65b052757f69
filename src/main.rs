//! # Gov News Feed
//!
//! Builds an RSS 2.0 feed from a municipal or government news site, for
//! consumption by WordPress auto-posting plugins.
//!
//! ## Features
//!
//! - Reads a WordPress REST API (`wp/v2/posts`) or scrapes an HTML listing
//! - Keeps only today's (or recent) news, minus denylisted topics
//! - Finds title, body and image through fallback chains, down to a
//!   per-topic default image
//! - Cleans bodies for CDATA: absolute URLs, internal ports removed, `]]>` split
//! - Writes the feed atomically; optionally remembers the newest item
//!
//! ## Usage
//!
//! ```sh
//! gov_news_feed -c cmfor.yaml -o feed.xml
//! ```
//!
//! ## Architecture
//!
//! One linear pass per run, driven by an external scheduler:
//! 1. **Fetch**: pull raw records from the configured source
//! 2. **Select**: date window, incremental bound and denylist
//! 3. **Extract**: title, body, image and summary per record
//! 4. **Output**: render RSS and replace the feed file

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dates;
mod extract;
mod fetch;
mod filter;
mod models;
mod outputs;
mod pipeline;
mod sanitize;
mod sources;
mod state;
mod utils;

use cli::Cli;
use config::{check_timeout, load_config};
use fetch::ReqwestFetcher;
use pipeline::{RunOptions, run};

#[tokio::main(flavor = "current_thread")]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("gov_news_feed starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = match load_config(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Could not load configuration");
            return Err(e);
        }
    };

    let tz = config.timezone()?;
    let now = Utc::now();
    let reference_date = args
        .date
        .unwrap_or_else(|| now.with_timezone(&tz).date_naive());

    let timeout = Duration::from_secs(check_timeout(args.timeout_secs.unwrap_or(config.site.timeout_secs))?);
    let fetcher = ReqwestFetcher::new(&config.site.user_agent, timeout)?;

    let options = RunOptions {
        reference_date,
        now,
        output_path: args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.output.path)),
        state_path: args.state.clone(),
        force_refresh_guids: args.force_refresh_guids,
    };
    info!(
        site = %config.site.name,
        %reference_date,
        output = %options.output_path.display(),
        incremental = options.state_path.is_some(),
        "Running feed pipeline"
    );

    let report = match run(&fetcher, &config, &options).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Feed run failed");
            return Err(e);
        }
    };

    let elapsed = start_time.elapsed();
    info!(
        fetched = report.fetched,
        selected = report.selected,
        emitted = report.emitted,
        skipped = report.skipped,
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
