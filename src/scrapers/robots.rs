//! Sitemap root discovery through `robots.txt`.
//!
//! Outlets announce their sitemaps with `Sitemap:` directives. When
//! `robots.txt` is missing or lists none, `<base>/sitemap.xml` is assumed.

use crate::http::HttpGet;
use itertools::Itertools;
use tracing::{info, instrument, warn};
use url::Url;

/// Extract the `Sitemap:` directive values from a robots.txt body.
///
/// Directive names are case-insensitive, comments are ignored and duplicate
/// URLs are reported once, in order of first appearance.
pub fn parse_robots_sitemaps(robots: &str) -> Vec<String> {
    robots
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter_map(|line| line.split_once(':'))
        .filter(|(directive, _)| directive.trim().eq_ignore_ascii_case("sitemap"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unique()
        .collect()
}

/// Find the sitemap roots of the outlet at `base_url`.
#[instrument(level = "info", skip(http), fields(base = %base_url))]
pub async fn discover_sitemap_roots<H: HttpGet>(http: &H, base_url: &Url) -> Vec<String> {
    let fallback = || -> Vec<String> {
        base_url
            .join("/sitemap.xml")
            .map(|u| vec![u.to_string()])
            .unwrap_or_default()
    };

    let robots_url = match base_url.join("/robots.txt") {
        Ok(u) => u.to_string(),
        Err(e) => {
            warn!(error = %e, "Cannot build robots.txt url");
            return fallback();
        }
    };

    let body = match http.get(&robots_url).await.and_then(|r| r.into_body(&robots_url)) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "robots.txt unavailable; falling back to /sitemap.xml");
            return fallback();
        }
    };

    let roots = parse_robots_sitemaps(&body);
    if roots.is_empty() {
        warn!("robots.txt lists no sitemaps; falling back to /sitemap.xml");
        return fallback();
    }
    info!(count = roots.len(), "Found sitemaps in robots.txt");
    roots
}
