//! Sitemap parsing and recursive resolution.
//!
//! A sitemap document is either a `<sitemapindex>` pointing at further
//! sitemaps or a `<urlset>` listing pages. [`SitemapResolver::resolve`] walks
//! the tree from a root URL and returns one [`CandidateEntry`] per listed
//! page. It does not look at dates; that is the date filter's job.
//!
//! # Traversal
//!
//! Resolution is a breadth-first worklist, not recursion:
//!
//! - every sitemap URL is normalized and recorded in a visited set before it
//!   is queued, so duplicate and cyclic links are fetched once
//! - the sitemaps of one level are fetched concurrently, at most
//!   `fanout` at a time
//! - several roots share one visited set and start as the first level
//! - failure of a lone root is fatal, as is failure of every root when there
//!   are several; failure of any other sitemap is logged, recorded in the
//!   run's drop ledger and skipped
//!
//! # Element handling
//!
//! Only direct `<loc>` / `<lastmod>` children of `<url>` and `<sitemap>`
//! count, so extension elements such as `<image:loc>` are ignored. When a
//! `<url>` has no `<lastmod>`, a Google News `<news:publication_date>` is used
//! instead.

use crate::context::{DropCause, RunContext};
use crate::error::{FetchError, ParseError, PipelineError, SitemapError};
use crate::http::HttpGet;
use crate::models::{CandidateEntry, SitemapKind, SitemapNode};
use futures::stream::{self, StreamExt};
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use std::collections::HashSet;
use tokio::time::timeout_at;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// One `<loc>` with its optional date, before it is known whether it points
/// at an article or at another sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapLocation {
    pub loc: String,
    pub last_modified: Option<String>,
}

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapDocument {
    pub node: SitemapNode,
    pub locations: Vec<SitemapLocation>,
}

#[derive(Debug, Default)]
struct PendingLocation {
    loc: Option<String>,
    last_modified: Option<String>,
    publication_date: Option<String>,
}

impl PendingLocation {
    fn finish(self) -> Option<SitemapLocation> {
        let loc = self.loc.filter(|l| !l.is_empty())?;
        Some(SitemapLocation {
            loc,
            last_modified: self.last_modified.or(self.publication_date),
        })
    }
}

fn classify_root(local_name: &[u8]) -> SitemapKind {
    match local_name {
        b"sitemapindex" => SitemapKind::Index,
        b"urlset" => SitemapKind::Leaf,
        _ => SitemapKind::Unknown,
    }
}

fn entry_element(kind: SitemapKind) -> &'static [u8] {
    match kind {
        SitemapKind::Index => b"sitemap",
        SitemapKind::Leaf | SitemapKind::Unknown => b"url",
    }
}

fn push_entity(text: &mut String, name: &str) {
    if let Some(code) = name.strip_prefix('#') {
        let parsed = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        if let Some(ch) = parsed.and_then(char::from_u32) {
            text.push(ch);
        }
        return;
    }
    let resolved = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        _ => "",
    };
    text.push_str(resolved);
}

/// Parse a sitemap document fetched from `url`.
///
/// # Errors
///
/// - [`ParseError::UnknownRoot`] if the root element is neither
///   `<urlset>` nor `<sitemapindex>`
/// - [`ParseError::Empty`] if there is no root element at all
/// - [`ParseError::Xml`] for malformed XML
pub fn parse_sitemap(url: &str, xml: &str) -> Result<SitemapDocument, ParseError> {
    let xml = xml.trim_start_matches('\u{feff}').trim_start();
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut kind: Option<SitemapKind> = None;
    let mut pending: Option<PendingLocation> = None;
    let mut locations = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                if stack.is_empty() {
                    let root_kind = classify_root(&local);
                    if root_kind == SitemapKind::Unknown {
                        return Err(ParseError::UnknownRoot {
                            url: url.to_string(),
                            root: String::from_utf8_lossy(&local).into_owned(),
                        });
                    }
                    kind = Some(root_kind);
                } else if stack.len() == 1 {
                    if let Some(k) = kind {
                        if local == entry_element(k) {
                            pending = Some(PendingLocation::default());
                        }
                    }
                }
                stack.push(local);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if stack.is_empty() {
                    let local = e.local_name().as_ref().to_vec();
                    let root_kind = classify_root(&local);
                    if root_kind == SitemapKind::Unknown {
                        return Err(ParseError::UnknownRoot {
                            url: url.to_string(),
                            root: String::from_utf8_lossy(&local).into_owned(),
                        });
                    }
                    kind = Some(root_kind);
                }
            }
            Ok(Event::Text(t)) => {
                let raw = String::from_utf8_lossy(&t);
                match unescape(&raw) {
                    Ok(decoded) => text.push_str(&decoded),
                    Err(_) => text.push_str(&raw),
                }
            }
            Ok(Event::CData(c)) => text.push_str(&String::from_utf8_lossy(&c)),
            Ok(Event::GeneralRef(r)) => push_entity(&mut text, &String::from_utf8_lossy(&r)),
            Ok(Event::End(_)) => {
                let Some(local) = stack.pop() else {
                    continue;
                };
                let depth = stack.len();
                if let Some(p) = pending.as_mut() {
                    let value = text.trim();
                    match (depth, local.as_slice()) {
                        (2, b"loc") => p.loc = Some(value.to_string()),
                        (2, b"lastmod") if !value.is_empty() => {
                            p.last_modified = Some(value.to_string())
                        }
                        (d, b"publication_date") if d >= 2 && !value.is_empty() => {
                            p.publication_date = Some(value.to_string())
                        }
                        _ => {}
                    }
                }
                if depth == 1 {
                    if let Some(location) = pending.take().and_then(PendingLocation::finish) {
                        locations.push(location);
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
            Ok(_) => {}
        }
    }

    let kind = kind.ok_or_else(|| ParseError::Empty {
        url: url.to_string(),
    })?;

    Ok(SitemapDocument {
        node: SitemapNode {
            url: url.to_string(),
            kind,
        },
        locations,
    })
}

/// Key for the visited set: fragment dropped, scheme and host lower-cased.
/// Query strings are kept because paged sitemaps differ only by query.
fn visit_key(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Whether a `<url><loc>` inside a urlset actually points at another sitemap.
fn looks_like_sitemap(loc: &str) -> bool {
    match Url::parse(loc) {
        Ok(u) => u.path().to_ascii_lowercase().ends_with(".xml"),
        Err(_) => loc.to_ascii_lowercase().ends_with(".xml"),
    }
}

/// Everything found below one root sitemap.
#[derive(Debug, Default)]
pub struct Resolution {
    /// One entry per `<url>` in every leaf reached, in traversal order.
    pub entries: Vec<CandidateEntry>,
    /// Every sitemap fetched and parsed successfully.
    pub visited: Vec<SitemapNode>,
    /// Child sitemaps that could not be loaded.
    pub failed: usize,
}

/// Expands sitemap trees into candidate article entries.
#[derive(Debug)]
pub struct SitemapResolver<H> {
    http: H,
    fanout: usize,
}

impl<H: HttpGet> SitemapResolver<H> {
    pub fn new(http: H, fanout: usize) -> Self {
        Self {
            http,
            fanout: fanout.max(1),
        }
    }

    /// Fetch and parse a single sitemap.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_document(&self, url: &str) -> Result<SitemapDocument, SitemapError> {
        let body = self.http.get(url).await?.into_body(url)?;
        let document = parse_sitemap(url, &body)?;
        debug!(
            kind = ?document.node.kind,
            locations = document.locations.len(),
            "Parsed sitemap"
        );
        Ok(document)
    }

    async fn fetch_before_deadline(
        &self,
        url: &str,
        ctx: &RunContext,
    ) -> Result<SitemapDocument, SitemapError> {
        if ctx.deadline_passed() {
            return Err(FetchError::DeadlineExceeded {
                url: url.to_string(),
            }
            .into());
        }
        match timeout_at(ctx.deadline(), self.fetch_document(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::DeadlineExceeded {
                url: url.to_string(),
            }
            .into()),
        }
    }

    /// Resolve `root` into the flat list of article candidates below it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RootFetch`] / [`PipelineError::RootParse`]
    /// when the root itself cannot be loaded. Failures further down are
    /// recorded in `ctx.ledger` and skipped.
    pub async fn resolve(&self, root: &str, ctx: &RunContext) -> Result<Resolution, PipelineError> {
        self.resolve_all(&[root.to_string()], ctx).await
    }

    /// Resolve several roots over one visited set, so a sitemap reachable
    /// from more than one root is fetched once.
    ///
    /// # Errors
    ///
    /// A lone root fails as in [`resolve`](Self::resolve). With several
    /// roots a failed root is recorded and skipped, and
    /// [`PipelineError::NoRoots`] is returned only when none of them loads.
    #[instrument(level = "info", skip_all, fields(roots = roots.len()))]
    pub async fn resolve_all(
        &self,
        roots: &[String],
        ctx: &RunContext,
    ) -> Result<Resolution, PipelineError> {
        let mut resolution = Resolution::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = roots
            .iter()
            .filter(|root| visited.insert(visit_key(root)))
            .cloned()
            .collect();
        let seeded = frontier.len();
        let mut roots_loaded = 0usize;
        let mut roots_failed = 0usize;
        let mut level = 0usize;

        while !frontier.is_empty() {
            if ctx.deadline_passed() {
                warn!(
                    pending = frontier.len(),
                    "Run deadline reached; abandoning unvisited sitemaps"
                );
                for url in frontier.drain(..) {
                    ctx.ledger.record(url, DropCause::DeadlineExceeded);
                }
                break;
            }

            let mut results: Vec<(String, Result<SitemapDocument, SitemapError>)> =
                stream::iter(std::mem::take(&mut frontier))
                    .map(|url| async move {
                        let result = self.fetch_before_deadline(&url, ctx).await;
                        (url, result)
                    })
                    .buffer_unordered(self.fanout)
                    .collect()
                    .await;
            results.sort_by(|a, b| a.0.cmp(&b.0));

            let mut next = Vec::new();
            for (url, result) in results {
                let document = match result {
                    Ok(document) => document,
                    Err(e) if level == 0 && seeded == 1 => return Err(e.into()),
                    Err(e) => {
                        if level == 0 {
                            roots_failed += 1;
                        }
                        warn!(%url, error = %e, "Skipping unavailable sitemap");
                        let cause = match e {
                            SitemapError::Fetch(FetchError::DeadlineExceeded { .. }) => {
                                DropCause::DeadlineExceeded
                            }
                            other => DropCause::SitemapUnavailable(other.to_string()),
                        };
                        ctx.ledger.record(url, cause);
                        resolution.failed += 1;
                        continue;
                    }
                };

                if level == 0 {
                    roots_loaded += 1;
                }
                let kind = document.node.kind;
                let mut leaf_entries = 0usize;
                for location in document.locations {
                    let is_child = kind == SitemapKind::Index || looks_like_sitemap(&location.loc);
                    if is_child {
                        if visited.insert(visit_key(&location.loc)) {
                            next.push(location.loc);
                        } else {
                            debug!(sitemap = %location.loc, "Sitemap already visited");
                        }
                    } else {
                        leaf_entries += 1;
                        resolution.entries.push(CandidateEntry {
                            url: location.loc,
                            last_modified: location.last_modified,
                            source_sitemap: url.clone(),
                        });
                    }
                }
                debug!(%url, ?kind, entries = leaf_entries, "Expanded sitemap");
                resolution.visited.push(document.node);
            }

            frontier = next;
            level += 1;
        }

        if roots_loaded == 0 && roots_failed == seeded {
            return Err(PipelineError::NoRoots {
                attempted: roots.len(),
            });
        }

        info!(
            sitemaps = resolution.visited.len(),
            failed = resolution.failed,
            entries = resolution.entries.len(),
            "Resolved sitemap tree"
        );
        Ok(resolution)
    }
}
