//! Small helpers shared by the stages: URL normalization, token estimates,
//! log truncation and output-directory checks.

use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

/// Normalize a URL for deduplication.
///
/// Scheme and host are lower-cased and default ports dropped (by the `url`
/// parser), the query string and fragment are removed, and a trailing slash
/// on a non-root path is trimmed. Sitemaps often list the same article with
/// different tracking parameters; all of them collapse to one key.
///
/// Unparseable input is returned trimmed, unchanged otherwise.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(
///     normalize_url("HTTPS://Example.com:443/a/b/?utm_source=x#top"),
///     "https://example.com/a/b"
/// );
/// ```
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

/// Rough token estimate: whitespace-separated words.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keep at most `max_tokens` words of `text`, joined by single spaces.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    text.split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary) with
/// an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/.sitemap_news_probe", path.trim_end_matches('/'));
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!(path, "Output bucket is writable");
    Ok(())
}
