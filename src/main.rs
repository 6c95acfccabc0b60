//! # Sitemap News
//!
//! Collects one news outlet's articles for one publication date, scores them
//! with hosted summarization and sentiment models and writes the results as
//! Parquet partitions.
//!
//! ## Usage
//!
//! ```sh
//! sitemap_news -u https://www.example.com -d 2023-08-20 \
//!     -s sshleifer/distilbart-cnn-12-6 \
//!     -m cardiffnlp/twitter-roberta-base-sentiment-latest \
//!     -b ./bucket
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Indexing**: Discover sitemaps via robots.txt and flatten them into candidate URLs
//! 2. **Filtering**: Keep the candidates whose URL (or lastmod) carries the target date
//! 3. **Fetching**: Download article HTML with bounded concurrency and retries
//! 4. **Extraction**: Reduce each page to its title and body text
//! 5. **Scoring**: Summarize each article, then classify the summary's sentiment
//! 6. **Output**: Write one Parquet file per (date, url suffix, domain)

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};
use url::Url;

mod api;
mod backoff;
mod cli;
mod config;
mod context;
mod error;
mod filter;
mod http;
mod models;
mod outputs;
mod pipeline;
mod scoring;
mod scrapers;
#[cfg(test)]
mod test_support;
mod utils;

use api::{HostedSentiment, HostedSummarizer, InferenceClient, Retrying};
use cli::Cli;
use config::load_config;
use context::RunContext;
use error::PipelineError;
use filter::DatePattern;
use http::ReqwestHttp;
use outputs::sink::LocalDirSink;
use pipeline::{Pipeline, RunRequest};
use scoring::ScoringAdapter;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    let dotenv = dotenvy::dotenv().ok();

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
    info!(dotenv = ?dotenv, "sitemap_news starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(
        base_url = %args.base_url,
        date = %args.date,
        date_format = %args.date_format,
        bucket = %args.bucket,
        sitemaps = ?args.sitemaps,
        "Parsed CLI arguments"
    );

    let config = args.apply_overrides(load_config(args.config.as_deref()).await?);

    let pattern = DatePattern::new(&args.date_format)?;
    let target_date = pattern.parse_exact(&args.date)?;
    let base_url = Url::parse(&args.base_url)
        .map_err(|e| PipelineError::Config(format!("invalid base url {}: {e}", args.base_url)))?;

    if let Err(e) = ensure_writable_dir(&args.bucket).await {
        error!(bucket = %args.bucket, error = %e, "Output bucket is not writable");
        return Err(PipelineError::Bucket {
            path: args.bucket.clone(),
            message: e.to_string(),
        }
        .into());
    }

    // --- Wire the stages ---
    let http = ReqwestHttp::new(&config.crawl.user_agent, config.request_timeout())?;
    let client = InferenceClient::new(
        &config.scoring.endpoint,
        args.api_token.clone(),
        Duration::from_secs(config.scoring.timeout_secs),
    )?;
    let summarizer = Retrying::new(
        HostedSummarizer::new(
            client.clone(),
            &args.summarizer_model,
            config.scoring.summarizer_max_input_tokens,
            config.scoring.summary_min_length,
            config.scoring.summary_max_length,
        ),
        config.scoring.retry_policy(),
    );
    let sentiment = Retrying::new(
        HostedSentiment::new(
            client,
            &args.sentiment_model,
            config.scoring.sentiment_max_input_tokens,
        ),
        config.scoring.retry_policy(),
    );

    let ctx = RunContext::new(config.deadline());
    let request = RunRequest {
        base_url,
        target_date,
        pattern,
        sitemaps: args.sitemaps.clone(),
    };
    let pipeline = Pipeline::new(
        http,
        ScoringAdapter::new(summarizer, sentiment),
        LocalDirSink::new(&args.bucket),
        config,
    );

    let summary = match pipeline.run(&request, &ctx).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, dropped = ctx.ledger.len(), "Run failed");
            return Err(e.into());
        }
    };

    for handle in &summary.partitions {
        info!(partition = %handle.key, rows = handle.rows, location = %handle.location, "Partition written");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        sitemaps = summary.sitemaps_visited,
        candidates = summary.candidates,
        dated = summary.dated,
        fetched = summary.fetched,
        extracted = summary.extracted,
        scored = summary.scored,
        rows = summary.rows_written(),
        dropped = ?summary.dropped,
        "Execution complete"
    );

    Ok(())
}
