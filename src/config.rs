//! Tuning configuration.
//!
//! Everything here has a default, so the YAML file is optional and may list
//! only the keys it changes:
//!
//! ```yaml
//! fetch:
//!   concurrency: 16
//!   max_attempts: 5
//! scoring:
//!   endpoint: http://localhost:8080/models
//! ```
//!
//! Command-line flags override the file (see [`crate::cli::Cli::apply_overrides`]).

use crate::api::DEFAULT_ENDPOINT;
use crate::backoff::RetryPolicy;
use crate::http::DEFAULT_USER_AGENT;
use crate::scrapers::extract::DEFAULT_MIN_BODY_CHARS;
use crate::scrapers::fetcher::FetchSettings;
use serde::Deserialize;
use std::error::Error;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Sibling sitemaps fetched at once.
    pub sitemap_fanout: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 60,
            sitemap_fanout: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub concurrency: usize,
    /// Total attempts per article, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Budget for crawling and fetching.
    pub deadline_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    pub min_body_chars: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_body_chars: DEFAULT_MIN_BODY_CHARS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    pub endpoint: String,
    /// Articles scored at once.
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub summarizer_max_input_tokens: usize,
    pub sentiment_max_input_tokens: usize,
    pub summary_min_length: usize,
    pub summary_max_length: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            concurrency: 2,
            timeout_secs: 120,
            max_attempts: 5,
            summarizer_max_input_tokens: 1024,
            sentiment_max_input_tokens: 512,
            summary_min_length: 96,
            summary_max_length: 256,
        }
    }
}

impl ScoringConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub fetch: FetchConfig,
    pub run: RunConfig,
    pub extract: ExtractConfig,
    pub scoring: ScoringConfig,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        // an empty document deserializes to unit, not to a map
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            concurrency: self.fetch.concurrency,
            timeout: Duration::from_secs(self.crawl.request_timeout_secs),
            retry: self.fetch.retry_policy(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawl.request_timeout_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.run.deadline_secs)
    }
}

/// Load the YAML file at `path`, or the defaults when there is none.
#[instrument(level = "info")]
pub async fn load_config(path: Option<&str>) -> Result<Config, Box<dyn Error>> {
    let Some(path) = path else {
        info!("No config file given; using defaults");
        return Ok(Config::default());
    };
    let yaml = tokio::fs::read_to_string(path).await?;
    let config = Config::from_yaml(&yaml)?;
    info!(path, "Loaded configuration");
    Ok(config)
}
