//! Date filtering of sitemap candidates.
//!
//! An entry survives when the date it carries equals the run's target date.
//! The date comes from the URL path if the configured strftime pattern finds
//! one there, otherwise from the sitemap's last-modified value parsed with
//! the same pattern. Parsing is strict: no fuzzy inference, and a URL that
//! carries two different valid dates is dropped rather than guessed at.
//!
//! Entries are deduplicated by normalized URL before any date is looked at.

use crate::context::DropCause;
use crate::error::ParseError;
use crate::models::{CandidateEntry, DatedEntry};
use crate::utils::normalize_url;
use chrono::NaiveDate;
use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;
use tracing::{debug, info, instrument};
use url::Url;

/// A validated strftime date pattern and the regex that finds it in text.
#[derive(Debug, Clone)]
pub struct DatePattern {
    format: String,
    matcher: Regex,
}

impl DatePattern {
    /// Compile `format` (e.g. `%Y-%m-%d` or `%Y/%m/%d`).
    ///
    /// # Errors
    ///
    /// [`ParseError::DatePattern`] if the pattern has an unsupported
    /// specifier or cannot represent a full calendar date.
    pub fn new(format: &str) -> Result<Self, ParseError> {
        let invalid = |message: &str| ParseError::DatePattern {
            pattern: format.to_string(),
            message: message.to_string(),
        };

        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(invalid("not a valid strftime pattern"));
        }

        // The pattern must round-trip a date to be usable for filtering.
        let probe = NaiveDate::from_ymd_opt(2023, 8, 20).ok_or_else(|| invalid("probe date"))?;
        let mut rendered = String::new();
        write!(rendered, "{}", probe.format(format)).map_err(|_| invalid("cannot format a date"))?;
        match NaiveDate::parse_from_str(&rendered, format) {
            Ok(parsed) if parsed == probe => {}
            _ => return Err(invalid("pattern does not identify a single calendar date")),
        }

        let mut regex = String::from(r"(?:^|[^0-9A-Za-z])(");
        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                regex.push_str(&regex::escape(&c.to_string()));
                continue;
            }
            let fragment = match chars.next() {
                Some('Y') => r"\d{4}",
                Some('y') | Some('m') | Some('d') => r"\d{2}",
                Some('e') => r"[ \d]?\d",
                Some('j') => r"\d{3}",
                Some('b') | Some('h') => r"[A-Za-z]{3}",
                Some('B') => r"[A-Za-z]{3,9}",
                Some('%') => "%",
                _ => return Err(invalid("only %Y %y %m %d %e %j %b %B are supported")),
            };
            regex.push_str(fragment);
        }
        // the trailing boundary is checked by hand so a separator can open the next match
        regex.push(')');

        let matcher = Regex::new(&regex).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            format: format.to_string(),
            matcher,
        })
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Parse `value` exactly, e.g. the `--date` argument.
    pub fn parse_exact(&self, value: &str) -> Result<NaiveDate, ParseError> {
        NaiveDate::parse_from_str(value.trim(), &self.format).map_err(|_| ParseError::Date {
            value: value.to_string(),
            pattern: self.format.clone(),
        })
    }

    /// All distinct valid dates found in a URL's (percent-decoded) path.
    pub fn dates_in_url(&self, url: &str) -> BTreeSet<NaiveDate> {
        let path = match Url::parse(url) {
            Ok(u) => u.path().to_string(),
            Err(_) => url.to_string(),
        };
        let path = match urlencoding::decode(&path) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => path.clone(),
        };

        let mut dates = BTreeSet::new();
        let mut at = 0;
        while let Some(caps) = self.matcher.captures_at(&path, at) {
            let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let bounded = path[token.end()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_ascii_alphanumeric());
            if bounded {
                if let Ok(date) = NaiveDate::parse_from_str(token.as_str(), &self.format) {
                    dates.insert(date);
                }
                at = token.end();
            } else {
                let skip = path[whole.start()..].chars().next().map_or(1, char::len_utf8);
                at = whole.start() + skip;
            }
        }
        dates
    }

    /// Date at the start of a last-modified value such as
    /// `2023-08-20T10:00:00+02:00`. The calendar date is taken as written,
    /// without converting between time zones.
    pub fn date_in_timestamp(&self, value: &str) -> Option<NaiveDate> {
        let (date, rest) = NaiveDate::parse_and_remainder(value.trim(), &self.format).ok()?;
        match rest.chars().next() {
            None => Some(date),
            Some(c) if c == 'T' || !c.is_ascii_alphanumeric() => Some(date),
            Some(_) => None,
        }
    }
}

/// Result of [`filter_entries`].
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub kept: Vec<DatedEntry>,
    /// Every entry that did not survive, with its single cause.
    pub dropped: Vec<(CandidateEntry, DropCause)>,
}

/// Split candidates into first occurrences and repeats of a normalized URL.
pub fn dedup_candidates(entries: Vec<CandidateEntry>) -> (Vec<CandidateEntry>, Vec<CandidateEntry>) {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(entries.len());
    let mut duplicates = Vec::new();
    for entry in entries {
        if seen.insert(normalize_url(&entry.url)) {
            unique.push(entry);
        } else {
            duplicates.push(entry);
        }
    }
    (unique, duplicates)
}

fn match_date(
    entry: &CandidateEntry,
    target: NaiveDate,
    pattern: &DatePattern,
) -> Result<NaiveDate, DropCause> {
    let in_url = pattern.dates_in_url(&entry.url);
    let found = match in_url.len() {
        0 => entry
            .last_modified
            .as_deref()
            .and_then(|lm| pattern.date_in_timestamp(lm))
            .ok_or(DropCause::NoDate)?,
        1 => in_url.into_iter().next().ok_or(DropCause::NoDate)?,
        _ => return Err(DropCause::AmbiguousDate),
    };
    if found == target {
        Ok(found)
    } else {
        Err(DropCause::DateMismatch)
    }
}

/// Keep the candidates dated exactly `target`.
#[instrument(level = "info", skip(entries, pattern), fields(count = entries.len(), pattern = %pattern.format()))]
pub fn filter_entries(
    entries: Vec<CandidateEntry>,
    target: NaiveDate,
    pattern: &DatePattern,
) -> FilterOutcome {
    let (unique, duplicates) = dedup_candidates(entries);
    let mut outcome = FilterOutcome {
        kept: Vec::new(),
        dropped: duplicates
            .into_iter()
            .map(|e| (e, DropCause::DuplicateUrl))
            .collect(),
    };

    for entry in unique {
        match match_date(&entry, target, pattern) {
            Ok(matched_date) => outcome.kept.push(DatedEntry {
                entry,
                matched_date,
            }),
            Err(cause) => {
                debug!(url = %entry.url, %cause, "Dropping candidate");
                outcome.dropped.push((entry, cause));
            }
        }
    }

    info!(
        kept = outcome.kept.len(),
        dropped = outcome.dropped.len(),
        %target,
        "Filtered candidates by date"
    );
    outcome
}
