//! Summarization and sentiment scoring of extracted articles.
//!
//! The two capabilities are independent traits, each identified by a model
//! id, so either can be swapped without touching the other. The
//! [`ScoringAdapter`] owns the policy around them:
//!
//! - text over the summarizer's input limit is split at the middle line,
//!   recursively, and the segment summaries are joined
//! - sentiment is computed on the summary, truncated to the sentiment
//!   model's limit
//! - labels are normalized to `pos` / `neu` / `neg` and scores validated
//!
//! A failure of either capability fails that article only.

use crate::error::ScoringError;
use crate::models::{ExtractedArticle, ScoredRecord, SentimentLabel};
use crate::utils::{estimate_tokens, truncate_tokens};
use tracing::{debug, instrument};
use url::Url;

/// Raw output of a sentiment model, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentiment {
    pub label: String,
    pub score: f64,
}

pub trait Summarizer {
    fn model_id(&self) -> &str;

    /// Largest input, in estimated tokens, the model accepts.
    fn max_input_tokens(&self) -> usize;

    async fn summarize(&self, text: &str) -> Result<String, ScoringError>;
}

pub trait SentimentAnalyzer {
    fn model_id(&self) -> &str;

    fn max_input_tokens(&self) -> usize;

    async fn analyze_sentiment(&self, text: &str) -> Result<Sentiment, ScoringError>;
}

impl<T: Summarizer> Summarizer for &T {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn max_input_tokens(&self) -> usize {
        (**self).max_input_tokens()
    }

    async fn summarize(&self, text: &str) -> Result<String, ScoringError> {
        (**self).summarize(text).await
    }
}

impl<T: SentimentAnalyzer> SentimentAnalyzer for &T {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn max_input_tokens(&self) -> usize {
        (**self).max_input_tokens()
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<Sentiment, ScoringError> {
        (**self).analyze_sentiment(text).await
    }
}

/// Normalized scores of one text.
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    pub summary: String,
    pub label: SentimentLabel,
    pub score: f64,
}

/// Split `text` into pieces of at most `max_tokens` estimated tokens.
///
/// Over-long text is halved at its middle line boundary until every piece
/// fits. A single line that is still too long is truncated.
pub fn segment(text: &str, max_tokens: usize) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if estimate_tokens(text) <= max_tokens {
        return vec![text.to_string()];
    }

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 {
        return vec![truncate_tokens(text, max_tokens)];
    }
    let (head, tail) = lines.split_at(lines.len() / 2);
    let mut pieces = segment(&head.join("\n"), max_tokens);
    pieces.extend(segment(&tail.join("\n"), max_tokens));
    pieces
}

fn malformed(capability: &str, message: impl Into<String>) -> ScoringError {
    ScoringError::Malformed {
        capability: capability.to_string(),
        message: message.into(),
    }
}

/// Host name used as the record's `source`, falling back to the raw link.
fn source_of(link: &str) -> String {
    Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| link.to_string())
}

#[derive(Debug)]
pub struct ScoringAdapter<S, A> {
    summarizer: S,
    sentiment: A,
}

impl<S: Summarizer, A: SentimentAnalyzer> ScoringAdapter<S, A> {
    pub fn new(summarizer: S, sentiment: A) -> Self {
        Self {
            summarizer,
            sentiment,
        }
    }

    pub fn summarization_model(&self) -> &str {
        self.summarizer.model_id()
    }

    pub fn sentiment_model(&self) -> &str {
        self.sentiment.model_id()
    }

    async fn summarize(&self, text: &str) -> Result<String, ScoringError> {
        let pieces = segment(text, self.summarizer.max_input_tokens());
        if pieces.is_empty() {
            return Err(ScoringError::EmptyInput);
        }
        if pieces.len() > 1 {
            debug!(segments = pieces.len(), "Text exceeds summarizer input; segmenting");
        }

        let mut parts = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            let part = self.summarizer.summarize(piece).await?;
            let part = part.trim();
            if !part.is_empty() {
                parts.push(part.to_string());
            }
        }
        if parts.is_empty() {
            return Err(malformed(self.summarizer.model_id(), "empty summary"));
        }
        Ok(parts.join(" "))
    }

    async fn classify(&self, summary: &str) -> Result<(SentimentLabel, f64), ScoringError> {
        let model = self.sentiment.model_id();
        let input = truncate_tokens(summary, self.sentiment.max_input_tokens().max(1));
        let raw = self.sentiment.analyze_sentiment(&input).await?;

        let label = SentimentLabel::from_model_label(&raw.label)
            .ok_or_else(|| malformed(model, format!("unknown label {:?}", raw.label)))?;
        if !raw.score.is_finite() || !(0.0..=1.0).contains(&raw.score) {
            return Err(malformed(model, format!("score {} outside [0, 1]", raw.score)));
        }
        Ok((label, raw.score))
    }

    /// Summarize `text`, then score the sentiment of the summary.
    pub async fn score(&self, text: &str) -> Result<Scores, ScoringError> {
        if text.trim().is_empty() {
            return Err(ScoringError::EmptyInput);
        }
        let summary = self.summarize(text).await?;
        let (label, score) = self.classify(&summary).await?;
        Ok(Scores {
            summary,
            label,
            score,
        })
    }

    /// Score one article into an output row.
    #[instrument(level = "info", skip_all, fields(url = %article.entry.url()))]
    pub async fn score_article(
        &self,
        article: &ExtractedArticle,
    ) -> Result<ScoredRecord, ScoringError> {
        let scores = self.score(&article.text).await?;
        let link = article.entry.url().to_string();
        debug!(label = %scores.label, score = scores.score, "Scored article");
        Ok(ScoredRecord {
            source: source_of(&link),
            link,
            summary: scores.summary,
            sentiment_label: scores.label,
            sentiment_score: scores.score,
            sentiment_model: self.sentiment.model_id().to_string(),
            summarization_model: self.summarizer.model_id().to_string(),
            date: article.entry.matched_date,
        })
    }
}
