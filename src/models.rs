//! Data models for the records that flow through the pipeline.
//!
//! Every stage consumes the previous stage's value and produces a new one:
//!
//! ```text
//! CandidateEntry -> DatedEntry -> FetchedArticle -> ExtractedArticle -> ScoredRecord
//! ```
//!
//! Nothing is mutated in place, so the output of an earlier stage stays valid
//! for logging after a later stage has dropped a record.

use crate::error::FetchError;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

/// What a sitemap document turned out to be, judged by its root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapKind {
    /// `<sitemapindex>`: lists further sitemaps.
    Index,
    /// `<urlset>`: lists article URLs.
    Leaf,
    /// Anything else.
    Unknown,
}

/// A fetched sitemap document, alive only while resolving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapNode {
    pub url: String,
    pub kind: SitemapKind,
}

/// One `<url>` entry found in a leaf sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    /// The article URL as listed in `<loc>`.
    pub url: String,
    /// `<lastmod>` (or `<news:publication_date>`) as written in the sitemap.
    pub last_modified: Option<String>,
    /// The leaf sitemap the entry came from.
    pub source_sitemap: String,
}

/// A candidate whose date matched the run's target date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedEntry {
    pub entry: CandidateEntry,
    pub matched_date: NaiveDate,
}

impl DatedEntry {
    pub fn url(&self) -> &str {
        &self.entry.url
    }
}

/// Downloaded article HTML.
#[derive(Debug, Clone)]
pub struct FetchedArticle {
    pub entry: DatedEntry,
    pub raw_html: String,
    pub fetched_at: DateTime<Utc>,
    /// Number of requests it took, always at least one.
    pub attempts: u32,
}

/// An article that could not be downloaded.
#[derive(Debug, Clone)]
pub struct FailedFetch {
    pub entry: DatedEntry,
    pub reason: FetchError,
    pub attempts: u32,
}

/// Plain article text, title first, one paragraph per line.
#[derive(Debug, Clone)]
pub struct ExtractedArticle {
    pub entry: DatedEntry,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentimentLabel {
    Pos,
    Neu,
    Neg,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Pos => "pos",
            SentimentLabel::Neu => "neu",
            SentimentLabel::Neg => "neg",
        }
    }

    /// Map a model's label onto the three-way scale.
    ///
    /// Accepts the common spellings (`POSITIVE`, `neutral`, `Negative`, ...)
    /// and the positional `LABEL_0..2` convention (negative, neutral,
    /// positive). Returns `None` for anything else.
    pub fn from_model_label(label: &str) -> Option<Self> {
        let lower = label.trim().to_ascii_lowercase();
        if lower.starts_with("pos") {
            Some(SentimentLabel::Pos)
        } else if lower.starts_with("neu") {
            Some(SentimentLabel::Neu)
        } else if lower.starts_with("neg") {
            Some(SentimentLabel::Neg)
        } else {
            match lower.as_str() {
                "label_0" => Some(SentimentLabel::Neg),
                "label_1" => Some(SentimentLabel::Neu),
                "label_2" => Some(SentimentLabel::Pos),
                _ => None,
            }
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished row of output.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// Host the article was served from.
    pub source: String,
    /// Article URL.
    pub link: String,
    pub summary: String,
    pub sentiment_label: SentimentLabel,
    /// Confidence of `sentiment_label`, within `[0, 1]`.
    pub sentiment_score: f64,
    pub sentiment_model: String,
    pub summarization_model: String,
    /// Matched publication date; selects the partition, not written as a column.
    pub date: NaiveDate,
}
