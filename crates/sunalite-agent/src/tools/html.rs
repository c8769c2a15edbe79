//! HTML helpers shared by the web tools and the text-mode browser.
//!
//! Regex-free text extraction plus small regex-based scrapers for titles,
//! links, images, tables, and simple `tag#id.class` selectors. Good enough
//! for feeding pages to a model, not a DOM.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use url::Url;

/// Tags whose boundaries become line breaks.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "header", "footer", "table", "ul", "ol", "blockquote", "pre", "title",
];

/// Elements that never have content or a closing tag.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Keywords reported by [`analyze`].
const TOP_KEYWORDS: usize = 10;

/// A hyperlink found on a page, resolved against the page URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Link {
    pub text: String,
    pub url: String,
}

/// Whether a response should go through [`html_to_text`].
pub fn looks_like_html(content_type: &str, body: &str) -> bool {
    content_type.contains("html") || body.trim_start().starts_with('<')
}

/// Remove tags, scripts, and styles, decode common entities, then collapse
/// whitespace. Block-level tags become newlines.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut skipping: Option<&'static str> = None;
    let mut tag_name = String::new();
    let mut collecting_name = false;

    for ch in html.chars() {
        if ch == '<' {
            in_tag = true;
            collecting_name = true;
            tag_name.clear();
            continue;
        }
        if in_tag {
            if ch == '>' {
                in_tag = false;
                let lower = tag_name.to_lowercase();
                let (closing, name) = match lower.strip_prefix('/') {
                    Some(rest) => (true, rest.trim_end_matches('/')),
                    None => (false, lower.trim_end_matches('/')),
                };
                match skipping {
                    Some(open) if closing && name == open => skipping = None,
                    Some(_) => {}
                    None if !closing && (name == "script" || name == "style") => {
                        skipping = Some(if name == "script" { "script" } else { "style" });
                    }
                    None if BLOCK_TAGS.contains(&name) => out.push('\n'),
                    None => {}
                }
            } else if collecting_name && (ch.is_ascii_alphanumeric() || ch == '/') {
                tag_name.push(ch);
            } else {
                collecting_name = false;
            }
            continue;
        }
        if skipping.is_none() {
            out.push(ch);
        }
    }

    collapse_whitespace(&decode_entities(&out))
}

/// Contents of the first `<title>` element, tags stripped.
pub fn extract_title(html: &str) -> Option<String> {
    static TITLE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = TITLE_RE
        .get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok())
        .as_ref()?;
    let raw = re.captures(html)?.get(1)?.as_str();
    let title = collapse_whitespace(&decode_entities(raw)).replace('\n', " ");
    (!title.is_empty()).then_some(title)
}

/// All `<a href>` links, resolved against `base` and de-duplicated.
///
/// `javascript:`, `mailto:`, and fragment-only links are skipped.
pub fn extract_links(html: &str, base: &Url) -> Vec<Link> {
    static LINK_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = LINK_RE
        .get_or_init(|| {
            Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).ok()
        })
        .as_ref()
    else {
        return Vec::new();
    };

    let mut links: Vec<Link> = Vec::new();
    for caps in re.captures_iter(html) {
        let href = decode_entities(caps.get(1).map_or("", |m| m.as_str()).trim());
        let lower = href.to_lowercase();
        if href.is_empty()
            || href.starts_with('#')
            || lower.starts_with("javascript:")
            || lower.starts_with("mailto:")
        {
            continue;
        }
        let Ok(mut resolved) = base.join(&href) else { continue };
        resolved.set_fragment(None);
        let url = resolved.to_string();
        if links.iter().any(|l| l.url == url) {
            continue;
        }
        let text = html_to_text(caps.get(2).map_or("", |m| m.as_str())).replace('\n', " ");
        links.push(Link { text, url });
    }
    links
}

// ─────────────────────────────────────────────
// Tag scanning
// ─────────────────────────────────────────────

/// One start or end tag, by byte offsets into the source.
struct Tag<'a> {
    closing: bool,
    self_closing: bool,
    name: String,
    attrs: &'a str,
    start: usize,
    end: usize,
}

fn tag_regex() -> Option<&'static Regex> {
    static TAG_RE: OnceLock<Option<Regex>> = OnceLock::new();
    TAG_RE
        .get_or_init(|| {
            Regex::new(r#"(?s)<(/?)([a-zA-Z][a-zA-Z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#).ok()
        })
        .as_ref()
}

fn scan_tags(html: &str) -> Vec<Tag<'_>> {
    let Some(re) = tag_regex() else {
        return Vec::new();
    };
    re.captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let attrs = caps.get(3).map_or("", |m| m.as_str());
            Some(Tag {
                closing: caps.get(1).is_some_and(|m| !m.as_str().is_empty()),
                self_closing: attrs.trim_end().ends_with('/'),
                name: caps.get(2)?.as_str().to_ascii_lowercase(),
                attrs,
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Attribute map of a start tag; names are lower-cased, values decoded.
fn parse_attributes(attrs: &str) -> HashMap<String, String> {
    static ATTR_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = ATTR_RE
        .get_or_init(|| {
            Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#)
                .ok()
        })
        .as_ref()
    else {
        return HashMap::new();
    };
    re.captures_iter(attrs)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            Some((name, decode_entities(value)))
        })
        .collect()
}

/// An element located by [`scan_elements`].
struct RawElement<'a> {
    name: String,
    attributes: HashMap<String, String>,
    inner: &'a str,
}

/// Every element whose start tag passes `keep`, in document order, with
/// its inner HTML up to the matching end tag (or the end of the input).
fn scan_elements<'a>(
    html: &'a str,
    keep: impl Fn(&str, &HashMap<String, String>) -> bool,
) -> Vec<RawElement<'a>> {
    let tags = scan_tags(html);
    let mut found = Vec::new();

    for (i, tag) in tags.iter().enumerate() {
        if tag.closing {
            continue;
        }
        let attributes = parse_attributes(tag.attrs);
        if !keep(&tag.name, &attributes) {
            continue;
        }
        let inner = if tag.self_closing || VOID_TAGS.contains(&tag.name.as_str()) {
            ""
        } else {
            let mut depth = 0usize;
            let mut end = html.len();
            for next in &tags[i + 1..] {
                if next.name != tag.name {
                    continue;
                }
                if next.closing {
                    if depth == 0 {
                        end = next.start;
                        break;
                    }
                    depth -= 1;
                } else if !next.self_closing {
                    depth += 1;
                }
            }
            &html[tag.end..end]
        };
        found.push(RawElement {
            name: tag.name.clone(),
            attributes,
            inner,
        });
    }
    found
}

// ─────────────────────────────────────────────
// Images and tables
// ─────────────────────────────────────────────

/// An `<img>` with its source resolved against the page URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Image {
    pub src: String,
    pub alt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

/// All images with a `src`, resolved against `base`.
pub fn extract_images(html: &str, base: &Url) -> Vec<Image> {
    scan_elements(html, |name, _| name == "img")
        .into_iter()
        .filter_map(|el| {
            let mut attrs = el.attributes;
            let src = attrs.remove("src").filter(|s| !s.trim().is_empty())?;
            let src = base.join(src.trim()).map_or(src, |u| u.to_string());
            Some(Image {
                src,
                alt: attrs.remove("alt").unwrap_or_default(),
                title: attrs.remove("title"),
                width: attrs.remove("width"),
                height: attrs.remove("height"),
            })
        })
        .collect()
}

/// A `<table>`: the first row as headers, the rest as data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub index: usize,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Data rows before `max_rows` was applied.
    pub total_rows: usize,
}

/// Tables in document order, keeping at most `max_rows` data rows each.
pub fn extract_tables(html: &str, max_rows: usize) -> Vec<Table> {
    scan_elements(html, |name, _| name == "table")
        .into_iter()
        .enumerate()
        .map(|(index, table)| {
            let mut rows: Vec<Vec<String>> = scan_elements(table.inner, |name, _| name == "tr")
                .into_iter()
                .map(|row| {
                    scan_elements(row.inner, |name, _| name == "td" || name == "th")
                        .into_iter()
                        .map(|cell| html_to_text(cell.inner).replace('\n', " "))
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells.is_empty())
                .collect();
            let headers = if rows.is_empty() { Vec::new() } else { rows.remove(0) };
            let total_rows = rows.len();
            rows.truncate(max_rows);
            Table {
                index,
                headers,
                rows,
                total_rows,
            }
        })
        .collect()
}

// ─────────────────────────────────────────────
// Selectors
// ─────────────────────────────────────────────

/// A compound selector: optional tag, optional `#id`, any `.class`es.
///
/// Descendant, child, and attribute selectors are not supported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectorError(String);

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsupported selector '{}': use tag, #id, .class, or a combination such as div.note",
            self.0
        )
    }
}

impl std::error::Error for SelectorError {}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let err = || SelectorError(raw.to_string());
        let is_name = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';

        let text = raw.trim();
        let mut selector = Selector::default();
        let mut rest = text;

        let tag_len = rest.find(|c: char| !is_name(c)).unwrap_or(rest.len());
        if tag_len > 0 {
            selector.tag = Some(rest[..tag_len].to_ascii_lowercase());
            rest = &rest[tag_len..];
        }
        while let Some(marker) = rest.chars().next() {
            let body = &rest[marker.len_utf8()..];
            let len = body.find(|c: char| !is_name(c)).unwrap_or(body.len());
            if len == 0 {
                return Err(err());
            }
            let name = body[..len].to_string();
            match marker {
                '#' if selector.id.is_none() => selector.id = Some(name),
                '.' => selector.classes.push(name),
                _ => return Err(err()),
            }
            rest = &body[len..];
        }

        if selector == Selector::default() {
            return Err(err());
        }
        Ok(selector)
    }
}

impl Selector {
    fn matches(&self, name: &str, attributes: &HashMap<String, String>) -> bool {
        if self.tag.as_deref().is_some_and(|t| t != name) {
            return false;
        }
        if let Some(id) = &self.id {
            if attributes.get("id") != Some(id) {
                return false;
            }
        }
        if self.classes.is_empty() {
            return true;
        }
        let Some(class) = attributes.get("class") else {
            return false;
        };
        let have: Vec<&str> = class.split_whitespace().collect();
        self.classes.iter().all(|c| have.contains(&c.as_str()))
    }
}

/// An element matched by a [`Selector`], reduced to text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Element {
    pub tag: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
}

/// Elements matching `selector`, in document order.
pub fn select(html: &str, selector: &Selector) -> Vec<Element> {
    scan_elements(html, |name, attrs| selector.matches(name, attrs))
        .into_iter()
        .map(|el| Element {
            tag: el.name,
            text: html_to_text(el.inner),
            attributes: el.attributes.into_iter().collect(),
        })
        .collect()
}

// ─────────────────────────────────────────────
// Page analysis
// ─────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Keyword {
    pub word: String,
    pub count: usize,
}

/// Structural summary of a page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAnalysis {
    pub title: Option<String>,
    /// `h1`..`h6` counts.
    pub headings: BTreeMap<String, usize>,
    pub links: usize,
    pub images: usize,
    pub tables: usize,
    pub forms: usize,
    pub scripts: usize,
    pub stylesheets: usize,
    /// Characters of readable text.
    pub text_length: usize,
    pub top_keywords: Vec<Keyword>,
}

/// Count the page's structural elements and its most frequent words.
pub fn analyze(html: &str) -> PageAnalysis {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut stylesheets = 0;
    for tag in scan_tags(html).iter().filter(|t| !t.closing) {
        *counts.entry(tag.name.clone()).or_default() += 1;
        if tag.name == "link"
            && parse_attributes(tag.attrs)
                .get("rel")
                .is_some_and(|rel| rel.to_ascii_lowercase().contains("stylesheet"))
        {
            stylesheets += 1;
        }
    }
    let count = |name: &str| counts.get(name).copied().unwrap_or(0);

    let text = html_to_text(html);
    PageAnalysis {
        title: extract_title(html),
        headings: (1..=6)
            .map(|level| {
                let name = format!("h{level}");
                let n = count(&name);
                (name, n)
            })
            .collect(),
        links: count("a"),
        images: count("img"),
        tables: count("table"),
        forms: count("form"),
        scripts: count("script"),
        stylesheets,
        text_length: text.chars().count(),
        top_keywords: top_keywords(&text, TOP_KEYWORDS),
    }
}

/// Most frequent words longer than three characters, ties broken
/// alphabetically.
fn top_keywords(text: &str, limit: usize) -> Vec<Keyword> {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
    {
        *freq.entry(word.to_lowercase()).or_default() += 1;
    }
    let mut ranked: Vec<Keyword> = freq
        .into_iter()
        .map(|(word, count)| Keyword { word, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    ranked.truncate(limit);
    ranked
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapse runs of spaces to one and runs of blank lines to one newline.
fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut pending_newline = false;

    for ch in text.chars() {
        if ch == '\n' {
            pending_newline = true;
            pending_space = false;
        } else if ch.is_whitespace() {
            if !pending_newline {
                pending_space = true;
            }
        } else {
            if pending_newline && !result.is_empty() {
                result.push('\n');
            } else if pending_space && !result.is_empty() {
                result.push(' ');
            }
            pending_newline = false;
            pending_space = false;
            result.push(ch);
        }
    }
    result
}
