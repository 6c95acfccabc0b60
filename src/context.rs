//! Per-run state: the overall deadline and the ledger of dropped entries.
//!
//! A [`RunContext`] is created once per invocation and passed by reference to
//! every stage. Nothing here is process-global, so concurrent runs (and
//! concurrent tests) never share state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Why an entry did not make it into the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropCause {
    /// Same normalized URL seen earlier in the run.
    DuplicateUrl,
    /// Neither the URL nor the last-modified value contained a date.
    NoDate,
    /// The URL contained more than one distinct date.
    AmbiguousDate,
    /// A date was found but it is not the target date.
    DateMismatch,
    /// A child sitemap could not be fetched or parsed.
    SitemapUnavailable(String),
    /// The article download failed permanently or ran out of attempts.
    FetchFailed(String),
    /// The run deadline expired before the work was done.
    DeadlineExceeded,
    /// The page had no recognizable article body.
    NoArticleBody,
    /// The URL's host has no registrable domain to partition by.
    NoPartitionKey,
    /// A scoring capability failed for this article.
    ScoringFailed(String),
}

impl DropCause {
    /// Stable name used as a metric/log key.
    pub fn name(&self) -> &'static str {
        match self {
            DropCause::DuplicateUrl => "duplicate_url",
            DropCause::NoDate => "no_date",
            DropCause::AmbiguousDate => "ambiguous_date",
            DropCause::DateMismatch => "date_mismatch",
            DropCause::SitemapUnavailable(_) => "sitemap_unavailable",
            DropCause::FetchFailed(_) => "fetch_failed",
            DropCause::DeadlineExceeded => "deadline_exceeded",
            DropCause::NoArticleBody => "no_article_body",
            DropCause::NoPartitionKey => "no_partition_key",
            DropCause::ScoringFailed(_) => "scoring_failed",
        }
    }
}

impl fmt::Display for DropCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropCause::SitemapUnavailable(reason)
            | DropCause::FetchFailed(reason)
            | DropCause::ScoringFailed(reason) => write!(f, "{}: {}", self.name(), reason),
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEntry {
    /// Article or sitemap URL.
    pub url: String,
    pub cause: DropCause,
}

/// Append-only record of everything the run dropped.
///
/// The lock is only held for a push or a read; never across an `.await`.
#[derive(Debug, Default)]
pub struct DropLedger {
    entries: Mutex<Vec<DroppedEntry>>,
}

impl DropLedger {
    pub fn record(&self, url: impl Into<String>, cause: DropCause) {
        let dropped = DroppedEntry {
            url: url.into(),
            cause,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dropped);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn snapshot(&self) -> Vec<DroppedEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of drops per cause name, ordered by name.
    pub fn counts_by_cause(&self) -> BTreeMap<&'static str, usize> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts = BTreeMap::new();
        for dropped in entries.iter() {
            *counts.entry(dropped.cause.name()).or_insert(0) += 1;
        }
        counts
    }
}

pub struct RunContext {
    deadline: Instant,
    pub ledger: DropLedger,
}

impl RunContext {
    /// Start a run that must finish crawling and fetching within `budget`.
    pub fn new(budget: Duration) -> Self {
        Self::with_deadline(Instant::now() + budget)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            ledger: DropLedger::default(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("remaining", &self.remaining())
            .field("dropped", &self.ledger.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_counts_by_cause() {
        let ledger = DropLedger::default();
        ledger.record("https://a.com/1", DropCause::NoDate);
        ledger.record("https://a.com/2", DropCause::NoDate);
        ledger.record("https://a.com/3", DropCause::FetchFailed("HTTP 404".into()));

        let counts = ledger.counts_by_cause();
        assert_eq!(counts.get("no_date"), Some(&2));
        assert_eq!(counts.get("fetch_failed"), Some(&1));
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_ledger_snapshot_preserves_order() {
        let ledger = DropLedger::default();
        ledger.record("https://a.com/1", DropCause::DuplicateUrl);
        ledger.record("https://a.com/2", DropCause::DateMismatch);
        let urls: Vec<_> = ledger.snapshot().into_iter().map(|d| d.url).collect();
        assert_eq!(urls, vec!["https://a.com/1", "https://a.com/2"]);
    }

    #[test]
    fn test_drop_cause_display() {
        assert_eq!(DropCause::NoArticleBody.to_string(), "no_article_body");
        assert_eq!(DropCause::NoPartitionKey.to_string(), "no_partition_key");
        assert_eq!(
            DropCause::ScoringFailed("timeout".into()).to_string(),
            "scoring_failed: timeout"
        );
    }

    #[tokio::test]
    async fn test_deadline_passed() {
        let ctx = RunContext::with_deadline(Instant::now());
        assert!(ctx.deadline_passed());
        assert_eq!(ctx.remaining(), Duration::ZERO);

        let ctx = RunContext::new(Duration::from_secs(60));
        assert!(!ctx.deadline_passed());
    }
}
