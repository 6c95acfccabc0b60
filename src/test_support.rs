//! In-memory stand-ins for the network and the bucket, used by unit tests.

use crate::error::{FetchError, ScoringError, WriteError};
use crate::http::{HttpGet, HttpResponse};
use crate::outputs::sink::ArtifactSink;
use crate::scoring::{Sentiment, SentimentAnalyzer, Summarizer};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

type Scripted = Result<HttpResponse, FetchError>;

/// [`HttpGet`] that replays canned responses per URL.
///
/// Each URL has a queue; the last response repeats once the queue is down to
/// one. Unknown URLs answer 404. Every request is counted.
#[derive(Debug, Default)]
pub struct ScriptedHttp {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    hits: Mutex<HashMap<String, usize>>,
    delay: Mutex<HashMap<String, Duration>>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, response: HttpResponse) -> Self {
        self.push(url, Ok(response))
    }

    /// Queue several responses for one URL, served in order.
    pub fn respond_seq(self, url: &str, responses: Vec<HttpResponse>) -> Self {
        responses
            .into_iter()
            .fold(self, |http, r| http.push(url, Ok(r)))
    }

    pub fn fail(self, url: &str, error: FetchError) -> Self {
        self.push(url, Err(error))
    }

    /// Sleep before answering `url`.
    pub fn delay(self, url: &str, delay: Duration) -> Self {
        self.delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), delay);
        self
    }

    fn push(self, url: &str, response: Scripted) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    fn next(&self, url: &str) -> Scripted {
        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        match responses.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Ok(HttpResponse::status(404))),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(HttpResponse::status(404))),
            None => Ok(HttpResponse::status(404)),
        }
    }
}

impl HttpGet for ScriptedHttp {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        *self
            .hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_insert(0) += 1;
        let delay = self
            .delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next(url)
    }
}

/// A `<urlset>` with the given `(loc, lastmod)` pairs.
pub fn urlset(entries: &[(&str, Option<&str>)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
"#,
    );
    for (loc, lastmod) in entries {
        xml.push_str("  <url><loc>");
        xml.push_str(&loc.replace('&', "&amp;"));
        xml.push_str("</loc>");
        if let Some(lastmod) = lastmod {
            xml.push_str("<lastmod>");
            xml.push_str(lastmod);
            xml.push_str("</lastmod>");
        }
        xml.push_str("</url>\n");
    }
    xml.push_str("</urlset>\n");
    xml
}

/// A `<sitemapindex>` pointing at `children`.
pub fn sitemap_index(children: &[&str]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
"#,
    );
    for loc in children {
        xml.push_str("  <sitemap><loc>");
        xml.push_str(&loc.replace('&', "&amp;"));
        xml.push_str("</loc></sitemap>\n");
    }
    xml.push_str("</sitemapindex>\n");
    xml
}

/// A minimal article page whose body is long enough to be extracted.
pub fn article_html(title: &str, paragraphs: &[&str]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<p>{p}</p>\n"))
        .collect();
    format!(
        "<html><head><title>{title} | Example News</title></head>\n\
         <body><nav><a href=\"/\">Home</a></nav>\n\
         <article><h1>{title}</h1>\n{body}</article>\n\
         <footer>Copyright Example News</footer></body></html>"
    )
}

fn failure_for(rules: &[(String, ScoringError)], text: &str) -> Option<ScoringError> {
    rules
        .iter()
        .find(|(needle, _)| text.contains(needle.as_str()))
        .map(|(_, e)| e.clone())
}

/// Summarizer that returns the first non-empty line of its input.
#[derive(Debug)]
pub struct StubSummarizer {
    model_id: String,
    max_input_tokens: usize,
    failures: Vec<(String, ScoringError)>,
    inputs: Mutex<Vec<String>>,
}

impl StubSummarizer {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            max_input_tokens: 1024,
            failures: Vec::new(),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_input_tokens(mut self, max: usize) -> Self {
        self.max_input_tokens = max;
        self
    }

    /// Fail any input containing `needle`.
    pub fn failing_on(mut self, needle: &str, error: ScoringError) -> Self {
        self.failures.push((needle.to_string(), error));
        self
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Summarizer for StubSummarizer {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn summarize(&self, text: &str) -> Result<String, ScoringError> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
        if let Some(e) = failure_for(&self.failures, text) {
            return Err(e);
        }
        Ok(text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string())
    }
}

/// Sentiment model answering a fixed label and score.
#[derive(Debug)]
pub struct StubSentiment {
    model_id: String,
    max_input_tokens: usize,
    label: String,
    score: f64,
    failures: Vec<(String, ScoringError)>,
    inputs: Mutex<Vec<String>>,
}

impl StubSentiment {
    pub fn fixed(model_id: &str, label: &str, score: f64) -> Self {
        Self {
            model_id: model_id.to_string(),
            max_input_tokens: 512,
            label: label.to_string(),
            score,
            failures: Vec::new(),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_input_tokens(mut self, max: usize) -> Self {
        self.max_input_tokens = max;
        self
    }

    pub fn failing_on(mut self, needle: &str, error: ScoringError) -> Self {
        self.failures.push((needle.to_string(), error));
        self
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SentimentAnalyzer for StubSentiment {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<Sentiment, ScoringError> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
        if let Some(e) = failure_for(&self.failures, text) {
            return Err(e);
        }
        Ok(Sentiment {
            label: self.label.clone(),
            score: self.score,
        })
    }
}

/// Sink that keeps published artifacts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to publish `key`.
    pub fn failing_on(mut self, key: &str) -> Self {
        self.failing.push(key.to_string());
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl ArtifactSink for MemorySink {
    async fn publish(&self, key: &str, bytes: Vec<u8>) -> Result<String, WriteError> {
        if self.failing.iter().any(|k| k == key) {
            return Err(WriteError::Io {
                path: key.to_string(),
                source: std::io::Error::other("bucket unavailable"),
            });
        }
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
        Ok(format!("memory://{key}"))
    }
}
