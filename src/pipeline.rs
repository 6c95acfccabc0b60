//! The end-to-end collection run.
//!
//! ```text
//! robots.txt -> sitemaps -> date filter -> fetch -> extract -> score -> partitions
//! ```
//!
//! Per-article problems never stop the run: each dropped entry is recorded in
//! the run's [`DropLedger`](crate::context::DropLedger) with exactly one
//! cause. Only unreachable sitemap roots or a failed partition write are
//! fatal.

use crate::config::Config;
use crate::context::{DropCause, RunContext};
use crate::error::{FetchError, PipelineError};
use crate::filter::{DatePattern, filter_entries};
use crate::http::HttpGet;
use crate::models::{CandidateEntry, ExtractedArticle, ScoredRecord};
use crate::outputs::partition::{PartitionHandle, PartitionKey, PartitionWriter};
use crate::outputs::sink::ArtifactSink;
use crate::scoring::{ScoringAdapter, SentimentAnalyzer, Summarizer};
use crate::scrapers::extract::ContentExtractor;
use crate::scrapers::fetcher::ArticleFetcher;
use crate::scrapers::robots::discover_sitemap_roots;
use crate::scrapers::sitemap::SitemapResolver;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};
use url::Url;

/// What to collect.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub base_url: Url,
    pub target_date: NaiveDate,
    pub pattern: DatePattern,
    /// Explicit sitemap roots; when empty they are discovered via robots.txt.
    pub sitemaps: Vec<String>,
}

/// Counts of one run, stage by stage.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub sitemaps_visited: usize,
    pub candidates: usize,
    pub dated: usize,
    pub fetched: usize,
    pub extracted: usize,
    pub scored: usize,
    pub partitions: Vec<PartitionHandle>,
    pub dropped: BTreeMap<&'static str, usize>,
}

impl RunSummary {
    pub fn rows_written(&self) -> usize {
        self.partitions.iter().map(|p| p.rows).sum()
    }
}

pub struct Pipeline<H, S, A, K> {
    http: H,
    scoring: ScoringAdapter<S, A>,
    writer: PartitionWriter<K>,
    extractor: ContentExtractor,
    config: Config,
}

impl<H, S, A, K> Pipeline<H, S, A, K>
where
    H: HttpGet,
    S: Summarizer,
    A: SentimentAnalyzer,
    K: ArtifactSink,
{
    pub fn new(http: H, scoring: ScoringAdapter<S, A>, sink: K, config: Config) -> Self {
        Self {
            http,
            scoring,
            writer: PartitionWriter::new(sink),
            extractor: ContentExtractor::new(config.extract.min_body_chars),
            config,
        }
    }

    /// Collect every candidate below the sitemap roots.
    ///
    /// With a single root its failure is returned as is. With several, failed
    /// roots are skipped and the run only fails when none resolved.
    async fn resolve_roots(
        &self,
        request: &RunRequest,
        ctx: &RunContext,
        summary: &mut RunSummary,
    ) -> Result<Vec<CandidateEntry>, PipelineError> {
        let roots = if request.sitemaps.is_empty() {
            discover_sitemap_roots(&self.http, &request.base_url).await
        } else {
            request.sitemaps.clone()
        };

        let resolver = SitemapResolver::new(&self.http, self.config.crawl.sitemap_fanout);
        let resolution = resolver.resolve_all(&roots, ctx).await?;
        summary.sitemaps_visited = resolution.visited.len();
        Ok(resolution.entries)
    }

    async fn score_all(
        &self,
        articles: Vec<ExtractedArticle>,
        ctx: &RunContext,
    ) -> Vec<ScoredRecord> {
        let concurrency = self.config.scoring.concurrency.max(1);
        let results: Vec<_> = stream::iter(articles)
            .map(|article| async move {
                let result = self.scoring.score_article(&article).await;
                (article, result)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut records = Vec::with_capacity(results.len());
        for (article, result) in results {
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(url = %article.entry.url(), error = %e, "Scoring failed; skipping article");
                    ctx.ledger
                        .record(article.entry.url(), DropCause::ScoringFailed(e.to_string()));
                }
            }
        }
        records
    }

    /// Run every stage once for `request`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::RootFetch`] / [`PipelineError::RootParse`] when the
    ///   only sitemap root cannot be loaded
    /// - [`PipelineError::NoRoots`] when none of several roots could be loaded
    /// - [`PipelineError::Write`] when a partition cannot be written
    #[instrument(level = "info", skip_all, fields(base = %request.base_url, date = %request.target_date))]
    pub async fn run(
        &self,
        request: &RunRequest,
        ctx: &RunContext,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();

        // ---- Index ----
        let candidates = self.resolve_roots(request, ctx, &mut summary).await?;
        summary.candidates = candidates.len();

        let filtered = filter_entries(candidates, request.target_date, &request.pattern);
        for (entry, cause) in filtered.dropped {
            ctx.ledger.record(entry.url, cause);
        }
        summary.dated = filtered.kept.len();

        let mut partitionable = Vec::with_capacity(filtered.kept.len());
        for entry in filtered.kept {
            if PartitionKey::for_link(entry.url(), entry.matched_date).is_some() {
                partitionable.push(entry);
            } else {
                warn!(url = %entry.url(), "Host has no registrable domain; skipping article");
                ctx.ledger.record(entry.entry.url, DropCause::NoPartitionKey);
            }
        }
        info!(
            candidates = summary.candidates,
            dated = summary.dated,
            "Selected articles for target date"
        );

        // ---- Fetch ----
        let fetcher = ArticleFetcher::new(&self.http, self.config.fetch_settings());
        let outcome = fetcher.fetch_all(partitionable, ctx).await;
        for duplicate in outcome.duplicates {
            ctx.ledger.record(duplicate.entry.url, DropCause::DuplicateUrl);
        }
        for failed in outcome.failed {
            let cause = match failed.reason {
                FetchError::DeadlineExceeded { .. } => DropCause::DeadlineExceeded,
                other => DropCause::FetchFailed(other.to_string()),
            };
            ctx.ledger.record(failed.entry.entry.url, cause);
        }
        summary.fetched = outcome.fetched.len();

        // ---- Extract ----
        let mut extracted = Vec::with_capacity(outcome.fetched.len());
        for article in &outcome.fetched {
            match self.extractor.extract_article(article) {
                Some(text) => extracted.push(text),
                None => {
                    warn!(url = %article.entry.url(), "No article body; skipping");
                    ctx.ledger.record(article.entry.url(), DropCause::NoArticleBody);
                }
            }
        }
        summary.extracted = extracted.len();
        info!(
            fetched = summary.fetched,
            extracted = summary.extracted,
            "Extracted article text"
        );

        // ---- Score ----
        let records = self.score_all(extracted, ctx).await;
        summary.scored = records.len();
        info!(
            scored = summary.scored,
            summarization_model = self.scoring.summarization_model(),
            sentiment_model = self.scoring.sentiment_model(),
            "Scored articles"
        );

        // ---- Write ----
        summary.partitions = self.writer.write(records).await?;
        summary.dropped = ctx.ledger.counts_by_cause();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoringError;
    use crate::http::HttpResponse;
    use crate::test_support::{
        MemorySink, ScriptedHttp, StubSentiment, StubSummarizer, article_html, sitemap_index,
        urlset,
    };
    use std::time::Duration;

    const BODY: &str = "Officials confirmed on Sunday that the coastal road will stay closed \
        for at least another week while engineers inspect the damaged sea wall and \
        assess whether emergency repairs can begin before the next high tide arrives.";

    fn config() -> Config {
        let mut config = Config::default();
        config.fetch.base_delay_ms = 0;
        config.fetch.max_delay_ms = 0;
        config.fetch.jitter_ms = 0;
        config
    }

    fn request(sitemaps: &[&str]) -> RunRequest {
        RunRequest {
            base_url: Url::parse("https://www.example.com").unwrap(),
            target_date: NaiveDate::from_ymd_opt(2023, 8, 20).unwrap(),
            pattern: DatePattern::new("%Y-%m-%d").unwrap(),
            sitemaps: sitemaps.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn page(title: &str) -> HttpResponse {
        HttpResponse::ok(article_html(title, &[BODY, BODY]))
    }

    fn pipeline<'a>(
        http: &'a ScriptedHttp,
        sink: &'a MemorySink,
        summarizer: StubSummarizer,
    ) -> Pipeline<&'a ScriptedHttp, StubSummarizer, StubSentiment, &'a MemorySink> {
        Pipeline::new(
            http,
            ScoringAdapter::new(summarizer, StubSentiment::fixed("sent-model", "POSITIVE", 0.8)),
            sink,
            config(),
        )
    }

    fn ctx() -> RunContext {
        RunContext::new(Duration::from_secs(60))
    }

    /// robots.txt -> index -> two leaves with three dated urls each.
    fn outlet() -> ScriptedHttp {
        ScriptedHttp::new()
            .respond(
                "https://www.example.com/robots.txt",
                HttpResponse::ok("User-agent: *\nSitemap: https://www.example.com/sitemap_index.xml\n"),
            )
            .respond(
                "https://www.example.com/sitemap_index.xml",
                HttpResponse::ok(sitemap_index(&[
                    "https://www.example.com/sitemap-news-1.xml",
                    "https://www.example.com/sitemap-news-2.xml",
                ])),
            )
            .respond(
                "https://www.example.com/sitemap-news-1.xml",
                HttpResponse::ok(urlset(&[
                    ("https://www.example.com/2023-08-19/harbour-reopens", None),
                    ("https://www.example.com/2023-08-20/storm-hits-coast", None),
                    ("https://www.example.com/2023-08-21/cleanup-begins", None),
                ])),
            )
            .respond(
                "https://www.example.com/sitemap-news-2.xml",
                HttpResponse::ok(urlset(&[
                    ("https://www.example.com/world/roads-closed", Some("2023-08-20T09:15:00+01:00")),
                    ("https://www.example.com/2023-08-18/election-preview", None),
                    ("https://www.example.com/sport/cup-final", Some("2023-08-22T18:00:00+00:00")),
                ])),
            )
            .respond(
                "https://www.example.com/2023-08-20/storm-hits-coast",
                page("Storm hits coast"),
            )
            .respond("https://www.example.com/world/roads-closed", page("Roads closed"))
    }

    #[tokio::test]
    async fn test_two_leaves_three_dates_two_survive() {
        let http = outlet();
        let sink = MemorySink::new();
        let ctx = ctx();
        let summary = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(&request(&[]), &ctx)
            .await
            .unwrap();

        assert_eq!(summary.sitemaps_visited, 3);
        assert_eq!(summary.candidates, 6);
        assert_eq!(summary.dated, 2);
        assert_eq!(summary.scored, 2);
        assert_eq!(summary.rows_written(), 2);
        assert_eq!(sink.keys(), vec!["2023-08-20/com/example.parquet"]);
        assert_eq!(summary.dropped.get("date_mismatch"), Some(&4));
        assert_eq!(http.hits("https://www.example.com/2023-08-19/harbour-reopens"), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success_end_to_end() {
        let http = ScriptedHttp::new()
            .respond(
                "https://www.example.com/sitemap.xml",
                HttpResponse::ok(urlset(&[("https://www.example.com/2023-08-20/a", None)])),
            )
            .respond_seq(
                "https://www.example.com/2023-08-20/a",
                vec![HttpResponse::status(500), HttpResponse::status(500), page("Flaky")],
            );
        let sink = MemorySink::new();
        let ctx = ctx();
        let summary = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(&request(&["https://www.example.com/sitemap.xml"]), &ctx)
            .await
            .unwrap();

        assert_eq!(http.hits("https://www.example.com/2023-08-20/a"), 3);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.rows_written(), 1);
        assert!(ctx.ledger.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_redirect_stub_is_not_written() {
        let stub = r#"<html><head><meta http-equiv="refresh" content="0; url=/2023-08-20/b"></head><body></body></html>"#;
        let http = ScriptedHttp::new()
            .respond(
                "https://www.example.com/sitemap.xml",
                HttpResponse::ok(urlset(&[
                    ("https://www.example.com/2023-08-20/a", None),
                    ("https://www.example.com/2023-08-20/moved", None),
                ])),
            )
            .respond("https://www.example.com/2023-08-20/a", page("Kept"))
            .respond("https://www.example.com/2023-08-20/moved", HttpResponse::ok(stub));
        let sink = MemorySink::new();
        let ctx = ctx();
        let summary = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(&request(&["https://www.example.com/sitemap.xml"]), &ctx)
            .await
            .unwrap();

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.rows_written(), 1);
        let dropped = ctx.ledger.snapshot();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].url, "https://www.example.com/2023-08-20/moved");
        assert_eq!(dropped[0].cause, DropCause::NoArticleBody);
    }

    #[tokio::test]
    async fn test_every_drop_has_one_cause() {
        let http = ScriptedHttp::new()
            .respond(
                "https://www.example.com/sitemap.xml",
                HttpResponse::ok(urlset(&[
                    ("https://www.example.com/2023-08-20/ok", None),
                    ("https://www.example.com/2023-08-20/ok?utm_source=rss", None),
                    ("https://www.example.com/about", None),
                    ("https://www.example.com/2023-08-20/gone", None),
                    ("https://www.example.com/2023-08-20/doomed", None),
                ])),
            )
            .respond("https://www.example.com/2023-08-20/ok", page("Fine"))
            .respond("https://www.example.com/2023-08-20/gone", HttpResponse::status(410))
            .respond("https://www.example.com/2023-08-20/doomed", page("Doomed"));
        let sink = MemorySink::new();
        let ctx = ctx();
        let summarizer = StubSummarizer::new("sum-model").failing_on(
            "Doomed",
            ScoringError::Timeout {
                capability: "summarization".into(),
            },
        );
        let summary = pipeline(&http, &sink, summarizer)
            .run(&request(&["https://www.example.com/sitemap.xml"]), &ctx)
            .await
            .unwrap();

        assert_eq!(summary.rows_written(), 1);
        let dropped = ctx.ledger.snapshot();
        assert_eq!(dropped.len(), 4);
        let causes: Vec<_> = dropped.iter().map(|d| d.cause.name()).collect();
        assert!(causes.contains(&"duplicate_url"));
        assert!(causes.contains(&"no_date"));
        assert!(causes.contains(&"fetch_failed"));
        assert!(causes.contains(&"scoring_failed"));
        // 5 candidates, 1 written, 4 dropped
        assert_eq!(summary.candidates, summary.rows_written() + dropped.len());
    }

    #[tokio::test]
    async fn test_single_root_failure_is_fatal() {
        let http = ScriptedHttp::new();
        let sink = MemorySink::new();
        let ctx = ctx();
        let err = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(&request(&["https://www.example.com/sitemap.xml"]), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::RootFetch(FetchError::Status { status: 404, .. })));
        assert!(sink.keys().is_empty());
    }

    #[tokio::test]
    async fn test_one_of_several_roots_may_fail() {
        let http = ScriptedHttp::new()
            .respond(
                "https://www.example.com/news.xml",
                HttpResponse::ok(urlset(&[("https://www.example.com/2023-08-20/a", None)])),
            )
            .respond("https://www.example.com/2023-08-20/a", page("Story"));
        let sink = MemorySink::new();
        let ctx = ctx();
        let summary = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(
                &request(&["https://www.example.com/broken.xml", "https://www.example.com/news.xml"]),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(summary.rows_written(), 1);
        assert_eq!(summary.dropped.get("sitemap_unavailable"), Some(&1));
    }

    #[tokio::test]
    async fn test_all_roots_failing_is_fatal() {
        let http = ScriptedHttp::new();
        let sink = MemorySink::new();
        let ctx = ctx();
        let err = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(
                &request(&["https://www.example.com/a.xml", "https://www.example.com/b.xml"]),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoRoots { attempted: 2 }));
    }

    #[tokio::test]
    async fn test_robots_listing_index_and_child_visits_child_once() {
        let http = ScriptedHttp::new()
            .respond(
                "https://www.example.com/robots.txt",
                HttpResponse::ok(
                    "Sitemap: https://www.example.com/index.xml\nSitemap: https://www.example.com/news.xml\n",
                ),
            )
            .respond(
                "https://www.example.com/index.xml",
                HttpResponse::ok(sitemap_index(&["https://www.example.com/news.xml"])),
            )
            .respond(
                "https://www.example.com/news.xml",
                HttpResponse::ok(urlset(&[("https://www.example.com/2023-08-20/a", None)])),
            )
            .respond("https://www.example.com/2023-08-20/a", page("Story"));
        let sink = MemorySink::new();
        let ctx = ctx();
        let summary = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(&request(&[]), &ctx)
            .await
            .unwrap();

        assert_eq!(http.hits("https://www.example.com/news.xml"), 1);
        assert_eq!(summary.sitemaps_visited, 2);
        assert_eq!(summary.candidates, 1);
        assert!(ctx.ledger.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_ip_host_is_dropped_not_fatal() {
        let http = ScriptedHttp::new()
            .respond(
                "https://www.example.com/sitemap.xml",
                HttpResponse::ok(urlset(&[
                    ("https://www.example.com/2023-08-20/a", None),
                    ("http://203.0.113.7/2023-08-20/b", None),
                ])),
            )
            .respond("https://www.example.com/2023-08-20/a", page("Story"))
            .respond("http://203.0.113.7/2023-08-20/b", page("Mirror"));
        let sink = MemorySink::new();
        let ctx = ctx();
        let summary = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(&request(&["https://www.example.com/sitemap.xml"]), &ctx)
            .await
            .unwrap();

        assert_eq!(sink.keys(), vec!["2023-08-20/com/example.parquet"]);
        assert_eq!(summary.rows_written(), 1);
        assert_eq!(http.hits("http://203.0.113.7/2023-08-20/b"), 0);
        let dropped = ctx.ledger.snapshot();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].url, "http://203.0.113.7/2023-08-20/b");
        assert_eq!(dropped[0].cause, DropCause::NoPartitionKey);
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal() {
        let http = ScriptedHttp::new()
            .respond(
                "https://www.example.com/sitemap.xml",
                HttpResponse::ok(urlset(&[("https://www.example.com/2023-08-20/a", None)])),
            )
            .respond("https://www.example.com/2023-08-20/a", page("Story"));
        let sink = MemorySink::new().failing_on("2023-08-20/com/example.parquet");
        let ctx = ctx();
        let err = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(&request(&["https://www.example.com/sitemap.xml"]), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Write(_)));
    }

    #[tokio::test]
    async fn test_nothing_dated_writes_nothing() {
        let http = ScriptedHttp::new().respond(
            "https://www.example.com/sitemap.xml",
            HttpResponse::ok(urlset(&[("https://www.example.com/2023-08-19/a", None)])),
        );
        let sink = MemorySink::new();
        let ctx = ctx();
        let summary = pipeline(&http, &sink, StubSummarizer::new("sum-model"))
            .run(&request(&["https://www.example.com/sitemap.xml"]), &ctx)
            .await
            .unwrap();
        assert!(summary.partitions.is_empty());
        assert!(sink.keys().is_empty());
    }
}
