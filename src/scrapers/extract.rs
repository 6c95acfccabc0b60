//! HTML to plain article text.
//!
//! The extractor looks for the most specific article container
//! (`[itemprop=articleBody]`, `article`, `main`, then `body`), collects its
//! text blocks and skips anything that looks like page chrome: navigation,
//! sharing widgets, newsletter boxes and the like. The result is the title
//! followed by one block per line.
//!
//! Redirect stubs, paywall teasers and pages without a body yield `None`.

use crate::models::{ExtractedArticle, FetchedArticle};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

const BLOCK_TAGS: &[&str] = &[
    "p",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "li",
    "blockquote",
    "pre",
];

const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "figure", "iframe",
    "svg", "button",
];

/// Matched against the words of `class` and `id` attributes, as prefixes.
const BOILERPLATE_KEYWORDS: &[&str] = &[
    "nav",
    "menu",
    "footer",
    "share",
    "social",
    "related",
    "newsletter",
    "subscribe",
    "cookie",
    "promo",
    "advert",
    "breadcrumb",
];

const BOILERPLATE_ROLES: &[&str] = &["navigation", "banner", "contentinfo", "complementary"];

pub const DEFAULT_MIN_BODY_CHARS: usize = 200;

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

static CONTAINERS: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&["[itemprop=\"articleBody\"]", "article", "main", "body"]));
static BLOCKS: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse(&BLOCK_TAGS.join(", ")).ok());
static HEADLINE: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("h1").ok());
static TITLE: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("head > title, title").ok());
static META_REFRESH: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("meta[http-equiv]").ok());

/// Text content with runs of whitespace collapsed to single spaces.
fn collapsed_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_block(element: &ElementRef<'_>) -> bool {
    BLOCK_TAGS.contains(&element.value().name())
}

fn is_boilerplate(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    if BOILERPLATE_TAGS.contains(&value.name()) {
        return true;
    }
    if value
        .attr("role")
        .is_some_and(|role| BOILERPLATE_ROLES.contains(&role.trim().to_ascii_lowercase().as_str()))
    {
        return true;
    }
    [value.attr("class"), value.attr("id")]
        .into_iter()
        .flatten()
        .flat_map(|attr| attr.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|word| !word.is_empty())
        .map(|word| word.to_ascii_lowercase())
        .any(|word| BOILERPLATE_KEYWORDS.iter().any(|k| word.starts_with(k)))
}

/// Whether something between `block` and `container` disqualifies it:
/// chrome, or an enclosing block that already carries its text.
fn has_disqualifying_ancestor(block: &ElementRef<'_>, container: &ElementRef<'_>) -> bool {
    for node in block.ancestors() {
        if node.id() == container.id() {
            return false;
        }
        if let Some(ancestor) = ElementRef::wrap(node) {
            if is_block(&ancestor) || is_boilerplate(&ancestor) {
                return true;
            }
        }
    }
    false
}

fn blocks_of(container: ElementRef<'_>) -> Vec<String> {
    let Some(selector) = BLOCKS.as_ref() else {
        return Vec::new();
    };
    container
        .select(selector)
        .filter(|block| !is_boilerplate(block) && !has_disqualifying_ancestor(block, &container))
        .map(collapsed_text)
        .filter(|text| !text.is_empty())
        .collect()
}

/// Target of a `content="<delay>; url=<target>"` refresh value.
///
/// A bare delay (`content="300"`) is a periodic reload, not a redirect.
fn refresh_target(content: &str) -> Option<&str> {
    let (_, rest) = content.split_once([';', ','])?;
    let (key, value) = rest.split_once('=')?;
    if !key.trim().eq_ignore_ascii_case("url") {
        return None;
    }
    Some(value.trim().trim_matches(['\'', '"']).trim()).filter(|target| !target.is_empty())
}

fn is_redirect_stub(document: &Html) -> bool {
    let Some(selector) = META_REFRESH.as_ref() else {
        return false;
    };
    document.select(selector).any(|meta| {
        let value = meta.value();
        value
            .attr("http-equiv")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"))
            && value.attr("content").and_then(refresh_target).is_some()
    })
}

/// The container's own headline, else the document `<title>`.
fn title_of(document: &Html, container: Option<ElementRef<'_>>) -> Option<String> {
    let headline = container.zip(HEADLINE.as_ref()).and_then(|(container, selector)| {
        container
            .select(selector)
            .filter(|h1| !has_disqualifying_ancestor(h1, &container))
            .map(collapsed_text)
            .find(|title| !title.is_empty())
    });
    headline.or_else(|| {
        TITLE
            .as_ref()
            .and_then(|selector| document.select(selector).next())
            .map(collapsed_text)
            .filter(|title| !title.is_empty())
    })
}

#[derive(Debug, Clone)]
pub struct ContentExtractor {
    min_body_chars: usize,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BODY_CHARS)
    }
}

impl ContentExtractor {
    pub fn new(min_body_chars: usize) -> Self {
        Self { min_body_chars }
    }

    /// Title plus body text of `html`, one block per line.
    pub fn extract(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        if is_redirect_stub(&document) {
            debug!("Page is a meta refresh redirect");
            return None;
        }

        let mut body = Vec::new();
        let mut chosen = None;
        for selector in CONTAINERS.iter() {
            let best = document
                .select(selector)
                .map(|container| (container, blocks_of(container)))
                .max_by_key(|(_, blocks)| blocks.iter().map(String::len).sum::<usize>());
            if let Some((container, blocks)) = best.filter(|(_, b)| !b.is_empty()) {
                body = blocks;
                chosen = Some(container);
                break;
            }
        }

        let body_chars: usize = body.iter().map(|b| b.chars().count()).sum();
        if body_chars < self.min_body_chars {
            debug!(body_chars, min = self.min_body_chars, "No article body");
            return None;
        }

        let mut lines = Vec::with_capacity(body.len() + 1);
        if let Some(title) = title_of(&document, chosen) {
            if body.first() != Some(&title) {
                lines.push(title);
            }
        }
        lines.extend(body);
        Some(lines.join("\n"))
    }

    #[instrument(level = "debug", skip_all, fields(url = %article.entry.url()))]
    pub fn extract_article(&self, article: &FetchedArticle) -> Option<ExtractedArticle> {
        self.extract(&article.raw_html).map(|text| ExtractedArticle {
            entry: article.entry.clone(),
            text,
        })
    }
}
