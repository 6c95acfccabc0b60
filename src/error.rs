//! Error taxonomy for the collection pipeline.
//!
//! Each stage has its own error type so a failure can be dropped at the
//! smallest granularity that owns it:
//!
//! | Error | Raised by | Fatal? |
//! |-------|-----------|--------|
//! | [`FetchError`] | sitemap and article downloads | only for the root sitemap |
//! | [`ParseError`] | sitemap XML, date patterns | only for the root sitemap |
//! | [`ScoringError`] | summarizer / sentiment capabilities | never |
//! | [`WriteError`] | partition serialization and publishing | always |
//!
//! Fatal conditions are surfaced to `main` as a [`PipelineError`].

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response from {url}: {message}")]
    Malformed { url: String, message: String },

    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("run deadline expired before {url} completed")]
    DeadlineExceeded { url: String },
}

impl FetchError {
    /// Timeouts, connection failures, 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Connect { .. } => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Malformed { .. }
            | FetchError::InvalidUrl { .. }
            | FetchError::DeadlineExceeded { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{url} is not a sitemap: unexpected root element <{root}>")]
    UnknownRoot { url: String, root: String },

    #[error("{url} has no root element")]
    Empty { url: String },

    #[error("invalid sitemap xml at {url}: {message}")]
    Xml { url: String, message: String },

    #[error("invalid date pattern {pattern:?}: {message}")]
    DatePattern { pattern: String, message: String },

    #[error("{value:?} does not match date pattern {pattern:?}")]
    Date { value: String, pattern: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoringError {
    #[error("{capability} timed out")]
    Timeout { capability: String },

    #[error("{capability} request failed: {message}")]
    Transport { capability: String, message: String },

    #[error("{capability} returned HTTP {status}: {body}")]
    Status {
        capability: String,
        status: u16,
        body: String,
    },

    #[error("{capability} returned malformed output: {message}")]
    Malformed { capability: String, message: String },

    #[error("nothing to score: article text is empty")]
    EmptyInput,
}

impl ScoringError {
    /// Model warm-up (503), throttling (429) and transport hiccups are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ScoringError::Timeout { .. } | ScoringError::Transport { .. } => true,
            ScoringError::Status { status, .. } => *status >= 500 || *status == 429,
            ScoringError::Malformed { .. } | ScoringError::EmptyInput => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode partition {key}: {message}")]
    Encode { key: String, message: String },

    #[error("cannot derive a partition key from {link}")]
    PartitionKey { link: String },
}

/// Failure to load one sitemap document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SitemapError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Conditions that abort the whole run with a non-zero exit.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("root sitemap could not be fetched: {0}")]
    RootFetch(#[from] FetchError),

    #[error("root sitemap could not be parsed: {0}")]
    RootParse(#[from] ParseError),

    #[error("no sitemap root could be resolved ({attempted} attempted)")]
    NoRoots { attempted: usize },

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("cannot open output bucket {path}: {message}")]
    Bucket { path: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<SitemapError> for PipelineError {
    fn from(err: SitemapError) -> Self {
        match err {
            SitemapError::Fetch(e) => PipelineError::RootFetch(e),
            SitemapError::Parse(e) => PipelineError::RootParse(e),
        }
    }
}
