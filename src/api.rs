//! Hosted inference API backend for the scoring capabilities.
//!
//! Both capabilities are served by an inference endpoint that exposes one URL
//! per model:
//!
//! ```text
//! POST {endpoint}/{model_id}
//! {"inputs": "...", "parameters": {...}, "options": {"wait_for_model": true}}
//! ```
//!
//! | Capability | Response |
//! |------------|----------|
//! | summarization | `[{"summary_text": "..."}]` |
//! | sentiment | `[[{"label": "...", "score": 0.9}, ...]]` or the flat form |
//!
//! # Architecture
//!
//! - [`InferenceClient`]: the shared HTTP client, one request per call
//! - [`HostedSummarizer`] / [`HostedSentiment`]: the two capabilities
//! - [`Retrying`]: decorator adding exponential backoff to either capability
//!
//! # Retry Strategy
//!
//! Model warm-up (`503`), throttling (`429`), timeouts and transport errors
//! are retried; anything else fails the article at once.

use crate::backoff::RetryPolicy;
use crate::error::ScoringError;
use crate::scoring::{Sentiment, SentimentAnalyzer, Summarizer};
use crate::utils::truncate_for_log;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_ENDPOINT: &str = "https://api-inference.huggingface.co/models";

const SUMMARIZATION: &str = "summarization";
const SENTIMENT: &str = "sentiment";

/// HTTP client for the inference endpoint.
#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl fmt::Debug for InferenceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceClient")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl InferenceClient {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn model_url(&self, model_id: &str) -> String {
        format!("{}/{}", self.endpoint, model_id.trim_start_matches('/'))
    }

    /// Send one request and return the decoded JSON body.
    #[instrument(level = "debug", skip(self, payload))]
    pub async fn infer(
        &self,
        capability: &str,
        model_id: &str,
        payload: &Value,
    ) -> Result<Value, ScoringError> {
        let t0 = Instant::now();
        let mut request = self.http.post(self.model_url(model_id)).json(payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                ScoringError::Timeout {
                    capability: capability.to_string(),
                }
            } else {
                ScoringError::Transport {
                    capability: capability.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        debug!(
            status = status.as_u16(),
            elapsed_ms = t0.elapsed().as_millis(),
            "Inference call complete"
        );

        if !status.is_success() {
            return Err(ScoringError::Status {
                capability: capability.to_string(),
                status: status.as_u16(),
                body: truncate_for_log(&body, 300),
            });
        }
        serde_json::from_str(&body).map_err(|e| ScoringError::Malformed {
            capability: capability.to_string(),
            message: format!("{e}; body: {}", truncate_for_log(&body, 300)),
        })
    }
}

pub fn summary_payload(text: &str, min_length: usize, max_length: usize) -> Value {
    json!({
        "inputs": text,
        "parameters": {"min_length": min_length, "max_length": max_length},
        "options": {"wait_for_model": true},
    })
}

pub fn sentiment_payload(text: &str) -> Value {
    json!({
        "inputs": text,
        "options": {"wait_for_model": true},
    })
}

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    summary_text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SentimentOutput {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

fn malformed(capability: &str, message: impl Into<String>) -> ScoringError {
    ScoringError::Malformed {
        capability: capability.to_string(),
        message: message.into(),
    }
}

/// Extract the summary from a summarization response.
pub fn parse_summary(value: Value) -> Result<String, ScoringError> {
    let outputs: Vec<SummaryOutput> =
        serde_json::from_value(value).map_err(|e| malformed(SUMMARIZATION, e.to_string()))?;
    outputs
        .into_iter()
        .next()
        .map(|o| o.summary_text)
        .ok_or_else(|| malformed(SUMMARIZATION, "no summary in response"))
}

/// Pick the highest-scoring label from a sentiment response.
pub fn parse_sentiment(value: Value) -> Result<Sentiment, ScoringError> {
    let output: SentimentOutput =
        serde_json::from_value(value).map_err(|e| malformed(SENTIMENT, e.to_string()))?;
    let candidates = match output {
        SentimentOutput::Nested(nested) => nested.into_iter().flatten().collect::<Vec<_>>(),
        SentimentOutput::Flat(flat) => flat,
    };
    candidates
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .map(|best| Sentiment {
            label: best.label,
            score: best.score,
        })
        .ok_or_else(|| malformed(SENTIMENT, "no labels in response"))
}

#[derive(Debug, Clone)]
pub struct HostedSummarizer {
    client: InferenceClient,
    model_id: String,
    max_input_tokens: usize,
    min_length: usize,
    max_length: usize,
}

impl HostedSummarizer {
    pub fn new(
        client: InferenceClient,
        model_id: &str,
        max_input_tokens: usize,
        min_length: usize,
        max_length: usize,
    ) -> Self {
        Self {
            client,
            model_id: model_id.to_string(),
            max_input_tokens,
            min_length,
            max_length,
        }
    }
}

impl Summarizer for HostedSummarizer {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn summarize(&self, text: &str) -> Result<String, ScoringError> {
        let payload = summary_payload(text, self.min_length, self.max_length);
        let value = self
            .client
            .infer(SUMMARIZATION, &self.model_id, &payload)
            .await?;
        parse_summary(value)
    }
}

#[derive(Debug, Clone)]
pub struct HostedSentiment {
    client: InferenceClient,
    model_id: String,
    max_input_tokens: usize,
}

impl HostedSentiment {
    pub fn new(client: InferenceClient, model_id: &str, max_input_tokens: usize) -> Self {
        Self {
            client,
            model_id: model_id.to_string(),
            max_input_tokens,
        }
    }
}

impl SentimentAnalyzer for HostedSentiment {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<Sentiment, ScoringError> {
        let value = self
            .client
            .infer(SENTIMENT, &self.model_id, &sentiment_payload(text))
            .await?;
        parse_sentiment(value)
    }
}

/// Wrapper that adds exponential backoff retry logic to a scoring capability.
///
/// The delay between retries follows:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter
/// ```
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for Retrying<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrying")
            .field("max_attempts", &self.policy.max_attempts)
            .field("base_delay", &self.policy.base_delay)
            .field("max_delay", &self.policy.max_delay)
            .finish()
    }
}

impl<T> Retrying<T> {
    async fn run<R, F, Fut>(&self, model_id: &str, mut call: F) -> Result<R, ScoringError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, ScoringError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            let attempt_t0 = Instant::now();
            let e = match call().await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };
            attempt += 1;
            let attempt_dt = attempt_t0.elapsed();
            let total_dt = total_t0.elapsed();

            if !e.is_transient() || !self.policy.allows_retry_after(attempt) {
                error!(
                    model = model_id,
                    attempt,
                    max = self.policy.max_attempts,
                    elapsed_ms_attempt = attempt_dt.as_millis(),
                    elapsed_ms_total = total_dt.as_millis(),
                    error = %e,
                    "Inference call failed; giving up"
                );
                return Err(e);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                model = model_id,
                attempt,
                max = self.policy.max_attempts,
                elapsed_ms_attempt = attempt_dt.as_millis(),
                elapsed_ms_total = total_dt.as_millis(),
                ?delay,
                error = %e,
                "Inference attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

impl<T: Summarizer> Summarizer for Retrying<T> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn max_input_tokens(&self) -> usize {
        self.inner.max_input_tokens()
    }

    async fn summarize(&self, text: &str) -> Result<String, ScoringError> {
        self.run(self.inner.model_id(), || self.inner.summarize(text))
            .await
    }
}

impl<T: SentimentAnalyzer> SentimentAnalyzer for Retrying<T> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn max_input_tokens(&self) -> usize {
        self.inner.max_input_tokens()
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<Sentiment, ScoringError> {
        self.run(self.inner.model_id(), || self.inner.analyze_sentiment(text))
            .await
    }
}
