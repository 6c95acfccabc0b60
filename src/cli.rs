//! Command-line interface definitions for sitemap_news.
//!
//! All arguments can be provided via command-line flags; the bucket and the
//! API token also fall back to environment variables (a `.env` file is
//! loaded first).

use crate::config::Config;
use clap::Parser;

/// Collect one outlet's articles for one date.
///
/// # Examples
///
/// ```sh
/// sitemap_news \
///     --base-url https://www.example.com \
///     --date 2023-08-20 \
///     --summarizer-model sshleifer/distilbart-cnn-12-6 \
///     --sentiment-model cardiffnlp/twitter-roberta-base-sentiment-latest \
///     --bucket ./bucket
///
/// # Skip robots.txt discovery
/// sitemap_news ... --sitemap https://www.example.com/news-sitemap.xml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Base URL of the news outlet
    #[arg(short = 'u', long)]
    pub base_url: String,

    /// Target publication date, written in --date-format
    #[arg(short, long)]
    pub date: String,

    /// strftime pattern of dates in article URLs
    #[arg(short = 'f', long, default_value = "%Y-%m-%d")]
    pub date_format: String,

    /// Model id of the summarization model
    #[arg(short, long)]
    pub summarizer_model: String,

    /// Model id of the sentiment model
    #[arg(short = 'm', long)]
    pub sentiment_model: String,

    /// Output bucket (a directory root)
    #[arg(short, long, env = "AWS_BUCKET")]
    pub bucket: String,

    /// Optional path to a YAML tuning file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Sitemap root URL; repeat for several. Skips robots.txt discovery.
    #[arg(long = "sitemap")]
    pub sitemaps: Vec<String>,

    /// Bearer token for the inference API
    #[arg(long, env = "INFERENCE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Concurrent article downloads (overrides the config file)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Total attempts per article download (overrides the config file)
    #[arg(long)]
    pub max_retries: Option<u32>,
}

impl Cli {
    /// Apply flag overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(concurrency) = self.concurrency {
            config.fetch.concurrency = concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.fetch.max_attempts = max_retries;
        }
        config
    }
}
