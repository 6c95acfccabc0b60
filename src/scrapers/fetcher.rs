//! Concurrent article download with bounded retry.
//!
//! A fixed number of workers drain a shared queue; each entry is taken by
//! exactly one worker. Transient failures are retried with exponential
//! backoff, permanent ones fail at once. Failures are returned alongside the
//! successes, never raised, so one bad article cannot stop the batch.
//!
//! Every request is bounded twice: by the per-request timeout and by the run
//! deadline. No attempt starts once the deadline has passed, and a request
//! still in flight at the deadline is abandoned.

use crate::backoff::RetryPolicy;
use crate::context::RunContext;
use crate::error::FetchError;
use crate::http::HttpGet;
use crate::models::{DatedEntry, FailedFetch, FetchedArticle};
use crate::utils::normalize_url;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Number of workers.
    pub concurrency: usize,
    /// Bound on a single request.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Downloaded articles, in input order.
    pub fetched: Vec<FetchedArticle>,
    /// Failed downloads, in input order.
    pub failed: Vec<FailedFetch>,
    /// Entries whose normalized URL was already queued.
    pub duplicates: Vec<DatedEntry>,
}

#[derive(Debug)]
pub struct ArticleFetcher<H> {
    http: H,
    settings: FetchSettings,
}

impl<H: HttpGet> ArticleFetcher<H> {
    pub fn new(http: H, settings: FetchSettings) -> Self {
        Self { http, settings }
    }

    async fn attempt(&self, url: &str, ctx: &RunContext) -> Result<String, FetchError> {
        let request = timeout(self.settings.timeout, self.http.get(url));
        match timeout_at(ctx.deadline(), request).await {
            Err(_) => Err(FetchError::DeadlineExceeded {
                url: url.to_string(),
            }),
            Ok(Err(_)) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
            Ok(Ok(response)) => response?.into_body(url),
        }
    }

    /// Download one article, retrying transient failures.
    pub async fn fetch_one(
        &self,
        entry: DatedEntry,
        ctx: &RunContext,
    ) -> Result<FetchedArticle, FailedFetch> {
        let url = entry.url().to_string();
        let policy = self.settings.retry;
        let total_t0 = Instant::now();
        let mut attempts = 0u32;

        loop {
            if ctx.deadline_passed() {
                return Err(FailedFetch {
                    reason: FetchError::DeadlineExceeded { url },
                    entry,
                    attempts,
                });
            }

            attempts += 1;
            let error = match self.attempt(&url, ctx).await {
                Ok(raw_html) => {
                    debug!(%url, attempts, bytes = raw_html.len(), "Fetched article");
                    return Ok(FetchedArticle {
                        entry,
                        raw_html,
                        fetched_at: Utc::now(),
                        attempts,
                    });
                }
                Err(e) => e,
            };

            if !error.is_transient() || !policy.allows_retry_after(attempts) {
                warn!(
                    %url,
                    attempts,
                    max = policy.max_attempts,
                    elapsed_ms_total = total_t0.elapsed().as_millis(),
                    error = %error,
                    "Article fetch failed"
                );
                return Err(FailedFetch {
                    entry,
                    reason: error,
                    attempts,
                });
            }

            let delay = policy.delay_for(attempts);
            warn!(
                %url,
                attempt = attempts,
                max = policy.max_attempts,
                ?delay,
                error = %error,
                "Fetch attempt failed; backing off"
            );
            sleep_until((Instant::now() + delay).min(ctx.deadline())).await;
        }
    }

    /// Download every entry with at most `concurrency` requests in flight.
    #[instrument(level = "info", skip_all, fields(count = entries.len(), concurrency = self.settings.concurrency))]
    pub async fn fetch_all(&self, entries: Vec<DatedEntry>, ctx: &RunContext) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();

        let mut seen = HashSet::new();
        let mut unique = VecDeque::new();
        for entry in entries {
            if seen.insert(normalize_url(entry.url())) {
                unique.push_back((unique.len(), entry));
            } else {
                outcome.duplicates.push(entry);
            }
        }

        let workers = self.settings.concurrency.max(1).min(unique.len().max(1));
        let queue = Mutex::new(unique);
        let results = Mutex::new(Vec::new());

        let worker = |_id: usize| {
            let queue = &queue;
            let results = &results;
            async move {
                loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                    let Some((index, entry)) = next else {
                        break;
                    };
                    let result = self.fetch_one(entry, ctx).await;
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((index, result));
                }
            }
        };
        join_all((0..workers).map(worker)).await;

        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_by_key(|(index, _)| *index);
        for (_, result) in results {
            match result {
                Ok(article) => outcome.fetched.push(article),
                Err(failed) => outcome.failed.push(failed),
            }
        }

        info!(
            fetched = outcome.fetched.len(),
            failed = outcome.failed.len(),
            duplicates = outcome.duplicates.len(),
            "Fetched articles"
        );
        outcome
    }
}
