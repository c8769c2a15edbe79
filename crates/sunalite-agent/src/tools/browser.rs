//! Browser tool — a text-mode browser with navigation history.
//!
//! Pages are loaded through a [`BrowserDriver`]. The default
//! [`HttpBrowserDriver`] fetches over HTTP and renders HTML to text; a
//! headless-browser driver can be slotted in behind the same trait.
//!
//! Actions on one session's browser are serialized by a mutex: a `back`
//! racing a `navigate` would otherwise leave the history inconsistent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use sunalite_core::config::schema::BrowserConfig;

use super::base::{optional_string, optional_u64, require_string, Tool, ToolParams};
use super::html::{extract_links, extract_title, html_to_text, select, Link, Selector};
use super::web::{fetch_capped, guarded_client, truncate_chars, MAX_BODY_BYTES};
use crate::error::{ErrorKind, ToolError, ToolResult};
use crate::policy::DomainPolicy;

/// Actions understood by the `browser` tool.
pub const BROWSER_ACTIONS: &[&str] = &[
    "navigate",
    "back",
    "forward",
    "refresh",
    "get_title",
    "get_url",
    "extract_text",
    "extract_links",
    "extract",
    "find_element",
];

/// Links returned by `extract_links` unless the caller asks for fewer.
const DEFAULT_MAX_LINKS: usize = 50;

/// Elements returned by `extract` unless the caller asks for fewer.
const DEFAULT_MAX_ELEMENTS: usize = 20;

/// Characters of element text shown by `find_element`.
const ELEMENT_PREVIEW_CHARS: usize = 100;

// ─────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────

/// A loaded page, reduced to text. The markup is kept for selector queries.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page {
    /// URL after redirects.
    pub url: String,
    pub status: u16,
    pub title: Option<String>,
    pub text: String,
    pub links: Vec<Link>,
    /// Raw HTML; empty for non-HTML responses.
    #[serde(skip)]
    pub html: String,
}

/// Something that can load a page. The URL has already passed the
/// domain policy.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn load(&self, url: &Url) -> Result<Page, ToolError>;
}

/// Plain HTTP driver: GET, follow policy-checked redirects, strip HTML.
pub struct HttpBrowserDriver {
    client: Client,
    max_text_chars: usize,
    max_body_bytes: usize,
}

impl HttpBrowserDriver {
    pub fn new(config: &BrowserConfig, domains: Arc<DomainPolicy>) -> reqwest::Result<Self> {
        Ok(Self {
            client: guarded_client(
                &config.user_agent,
                Duration::from_secs(config.timeout_seconds.max(1)),
                domains,
            )?,
            max_text_chars: config.max_text_chars,
            max_body_bytes: MAX_BODY_BYTES,
        })
    }

    /// Override the body byte cap.
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes.max(1);
        self
    }
}

#[async_trait]
impl BrowserDriver for HttpBrowserDriver {
    async fn load(&self, url: &Url) -> Result<Page, ToolError> {
        let fetched = fetch_capped(&self.client, url, self.max_body_bytes).await?;
        let is_html = fetched.is_html();
        let status = fetched.status.as_u16();

        let (title, text, links, html) = if is_html {
            (
                extract_title(&fetched.body),
                html_to_text(&fetched.body),
                extract_links(&fetched.body, &fetched.final_url),
                fetched.body,
            )
        } else {
            (None, fetched.body, Vec::new(), String::new())
        };
        let (text, _) = truncate_chars(text, self.max_text_chars);

        Ok(Page {
            url: fetched.final_url.to_string(),
            status,
            title,
            text,
            links,
            html,
        })
    }
}

// ─────────────────────────────────────────────
// History
// ─────────────────────────────────────────────

#[derive(Default)]
struct History {
    pages: Vec<Page>,
    current: Option<usize>,
}

impl History {
    fn current(&self) -> Result<&Page, ToolError> {
        self.current
            .and_then(|i| self.pages.get(i))
            .ok_or_else(|| ToolError::validation("No page loaded; call navigate first"))
    }

    /// Push a page, dropping any forward entries.
    fn visit(&mut self, page: Page) {
        let keep = self.current.map_or(0, |i| i + 1);
        self.pages.truncate(keep);
        self.pages.push(page);
        self.current = Some(self.pages.len() - 1);
    }

    fn step(&mut self, delta: isize) -> Result<&Page, ToolError> {
        let current = self
            .current
            .ok_or_else(|| ToolError::validation("No page loaded; call navigate first"))?;
        let target = current
            .checked_add_signed(delta)
            .filter(|t| *t < self.pages.len())
            .ok_or_else(|| {
                ToolError::validation(if delta < 0 {
                    "No previous page in history"
                } else {
                    "No next page in history"
                })
            })?;
        self.current = Some(target);
        Ok(&self.pages[target])
    }
}

// ─────────────────────────────────────────────
// BrowserTool
// ─────────────────────────────────────────────

/// Navigate pages and read their text and links.
pub struct BrowserTool {
    driver: Arc<dyn BrowserDriver>,
    domains: Arc<DomainPolicy>,
    history: Mutex<History>,
    timeout: Duration,
}

impl BrowserTool {
    pub fn new(driver: Arc<dyn BrowserDriver>, domains: Arc<DomainPolicy>, timeout: Duration) -> Self {
        Self {
            driver,
            domains,
            history: Mutex::new(History::default()),
            timeout,
        }
    }

    async fn load_checked(&self, raw: &str) -> Result<Page, ToolError> {
        let url = self.domains.check_url(raw)?;
        debug!(url = %url, "browser loading page");
        self.driver.load(&url).await
    }

    async fn run(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let action = require_string(&params, "action")?;
        let mut history = self.history.lock().await;

        match action.as_str() {
            "navigate" => {
                let url = require_string(&params, "url")?;
                let page = self.load_checked(&url).await?;
                let result = page_summary("Navigated to", &page);
                history.visit(page);
                Ok(result)
            }
            "back" => Ok(page_summary("Went back to", history.step(-1)?)),
            "forward" => Ok(page_summary("Went forward to", history.step(1)?)),
            "refresh" => {
                let url = history.current()?.url.clone();
                let page = self.load_checked(&url).await?;
                let result = page_summary("Reloaded", &page);
                if let Some(i) = history.current {
                    history.pages[i] = page;
                }
                Ok(result)
            }
            "get_title" => {
                let page = history.current()?;
                let title = page.title.clone().unwrap_or_default();
                Ok(ToolResult::ok(if title.is_empty() { "(untitled page)".to_string() } else { title.clone() })
                    .with_data(json!({"title": title, "url": page.url})))
            }
            "get_url" => {
                let page = history.current()?;
                Ok(ToolResult::ok(page.url.clone()).with_data(json!({"url": page.url})))
            }
            "extract_text" => {
                let page = history.current()?;
                let (text, truncated) = match optional_u64(&params, "max_chars")? {
                    Some(n) => truncate_chars(page.text.clone(), (n as usize).max(1)),
                    None => (page.text.clone(), false),
                };
                Ok(ToolResult::ok(text.clone()).with_data(json!({
                    "url": page.url,
                    "length": text.chars().count(),
                    "truncated": truncated,
                    "text": text,
                })))
            }
            "extract_links" => {
                let page = history.current()?;
                let limit = optional_u64(&params, "max_links")?
                    .map(|n| (n as usize).max(1))
                    .unwrap_or(DEFAULT_MAX_LINKS);
                let links: Vec<&Link> = page.links.iter().take(limit).collect();
                let listing: Vec<String> = links
                    .iter()
                    .enumerate()
                    .map(|(i, l)| format!("{}. {} <{}>", i + 1, l.text, l.url))
                    .collect();
                let message = if listing.is_empty() {
                    format!("No links on {}", page.url)
                } else {
                    listing.join("\n")
                };
                Ok(ToolResult::ok(message).with_data(json!({
                    "url": page.url,
                    "total": page.links.len(),
                    "links": links,
                })))
            }
            "extract" => {
                let page = history.current()?;
                let Some(raw) = optional_string(&params, "selector")? else {
                    let (text, truncated) = match optional_u64(&params, "max_chars")? {
                        Some(n) => truncate_chars(page.text.clone(), (n as usize).max(1)),
                        None => (page.text.clone(), false),
                    };
                    return Ok(ToolResult::ok(text.clone()).with_data(json!({
                        "url": page.url,
                        "truncated": truncated,
                        "text": text,
                    })));
                };
                let selector = parse_selector(&raw)?;
                let limit = optional_u64(&params, "max_elements")?
                    .map(|n| (n as usize).max(1))
                    .unwrap_or(DEFAULT_MAX_ELEMENTS);
                let mut elements = select(&page.html, &selector);
                let total = elements.len();
                elements.truncate(limit);

                let message = if elements.is_empty() {
                    format!("No elements match '{raw}' on {}", page.url)
                } else {
                    elements
                        .iter()
                        .enumerate()
                        .map(|(i, el)| format!("{}. <{}> {}", i + 1, el.tag, el.text.replace('\n', " ")))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                Ok(ToolResult::ok(message).with_data(json!({
                    "url": page.url,
                    "selector": raw,
                    "total": total,
                    "elements": elements,
                })))
            }
            "find_element" => {
                let page = history.current()?;
                let raw = require_string(&params, "selector")?;
                let selector = parse_selector(&raw)?;
                let matches = select(&page.html, &selector);
                let Some(first) = matches.first() else {
                    return Ok(ToolResult::failure(
                        ErrorKind::ValidationError,
                        format!("Element not found: '{raw}' on {}", page.url),
                    )
                    .with_data(json!({"selector": raw, "found": false})));
                };
                let preview = truncate_chars(first.text.replace('\n', " "), ELEMENT_PREVIEW_CHARS).0;
                Ok(ToolResult::ok(format!(
                    "Found <{}> for '{raw}' ({} match(es)): {preview}",
                    first.tag,
                    matches.len()
                ))
                .with_data(json!({
                    "selector": raw,
                    "found": true,
                    "matches": matches.len(),
                    "element": {
                        "tag": first.tag,
                        "text": preview,
                        "attributes": first.attributes,
                    },
                })))
            }
            other => Err(ToolError::validation(format!(
                "Unsupported browser action '{other}'. Supported: {}",
                BROWSER_ACTIONS.join(", ")
            ))),
        }
    }
}

fn parse_selector(raw: &str) -> Result<Selector, ToolError> {
    raw.parse::<Selector>()
        .map_err(|e| ToolError::validation(e.to_string()))
}

fn page_summary(verb: &str, page: &Page) -> ToolResult {
    let title = page.title.as_deref().unwrap_or("(untitled page)");
    let message = format!("{verb} {} ({title})", page.url);
    let data = json!({
        "url": page.url,
        "title": page.title,
        "status": page.status,
        "textLength": page.text.chars().count(),
        "linkCount": page.links.len(),
    });
    if page.status >= 400 {
        ToolResult::failure(ErrorKind::ExecutionFailed, format!("{message}: HTTP {}", page.status))
            .with_data(data)
    } else {
        ToolResult::ok(message).with_data(data)
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Text-mode web browser with history. Navigate to a URL, move back and forward, \
         refresh, and read the current page's title, URL, text, or links. \
         extract and find_element query the page with simple selectors \
         (tag, #id, .class, or combinations such as div.note)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": BROWSER_ACTIONS,
                    "description": "What to do"
                },
                "url": {
                    "type": "string",
                    "description": "Target URL (navigate only)"
                },
                "max_chars": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Limit for extract_text"
                },
                "max_links": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Limit for extract_links (default 50)"
                },
                "selector": {
                    "type": "string",
                    "description": "Element selector for extract (optional) and find_element"
                },
                "max_elements": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Limit for extract with a selector (default 20)"
                }
            },
            "required": ["action"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.run(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serves canned pages and counts loads.
    struct FakeDriver {
        pages: HashMap<String, Page>,
        loads: AtomicUsize,
    }

    impl FakeDriver {
        fn new(urls: &[&str]) -> Self {
            let pages = urls
                .iter()
                .map(|u| {
                    let page = Page {
                        url: u.to_string(),
                        status: 200,
                        title: Some(format!("Title of {u}")),
                        text: format!("Body of {u}"),
                        links: vec![Link {
                            text: "next".into(),
                            url: format!("{u}next"),
                        }],
                        html: format!(
                            "<h1 id=\"top\">Heading of {u}</h1>\
                             <ul><li class=\"item\">one</li><li class=\"item hot\">two</li></ul>"
                        ),
                    };
                    (u.to_string(), page)
                })
                .collect();
            Self {
                pages,
                loads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn load(&self, url: &Url) -> Result<Page, ToolError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| ToolError::execution(format!("no such page {url}")))
        }
    }

    fn params(v: Value) -> ToolParams {
        serde_json::from_value(v).unwrap()
    }

    fn tool_with(driver: Arc<FakeDriver>, domains: DomainPolicy) -> BrowserTool {
        BrowserTool::new(driver, Arc::new(domains), Duration::from_secs(5))
    }

    const A: &str = "https://a.example/";
    const B: &str = "https://b.example/";
    const C: &str = "https://c.example/";

    #[tokio::test]
    async fn test_history_navigation() {
        let driver = Arc::new(FakeDriver::new(&[A, B, C]));
        let tool = tool_with(driver.clone(), DomainPolicy::open());

        for url in [A, B] {
            let r = tool.execute(params(json!({"action": "navigate", "url": url}))).await;
            assert!(r.success, "{}", r.message);
        }
        let url = tool.execute(params(json!({"action": "get_url"}))).await;
        assert_eq!(url.message, B);

        let back = tool.execute(params(json!({"action": "back"}))).await;
        assert!(back.success);
        assert_eq!(tool.execute(params(json!({"action": "get_url"}))).await.message, A);

        let no_more = tool.execute(params(json!({"action": "back"}))).await;
        assert_eq!(no_more.error, Some(ErrorKind::ValidationError));

        let fwd = tool.execute(params(json!({"action": "forward"}))).await;
        assert!(fwd.success);
        assert_eq!(tool.execute(params(json!({"action": "get_url"}))).await.message, B);

        // back/forward are served from history
        assert_eq!(driver.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_navigate_drops_forward_entries() {
        let driver = Arc::new(FakeDriver::new(&[A, B, C]));
        let tool = tool_with(driver, DomainPolicy::open());
        tool.execute(params(json!({"action": "navigate", "url": A}))).await;
        tool.execute(params(json!({"action": "navigate", "url": B}))).await;
        tool.execute(params(json!({"action": "back"}))).await;
        tool.execute(params(json!({"action": "navigate", "url": C}))).await;

        let fwd = tool.execute(params(json!({"action": "forward"}))).await;
        assert_eq!(fwd.error, Some(ErrorKind::ValidationError));
        let back = tool.execute(params(json!({"action": "back"}))).await;
        assert!(back.message.contains(A));
    }

    #[tokio::test]
    async fn test_refresh_reloads() {
        let driver = Arc::new(FakeDriver::new(&[A]));
        let tool = tool_with(driver.clone(), DomainPolicy::open());
        tool.execute(params(json!({"action": "navigate", "url": A}))).await;
        let r = tool.execute(params(json!({"action": "refresh"}))).await;
        assert!(r.success);
        assert_eq!(driver.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reads_require_a_page() {
        let tool = tool_with(Arc::new(FakeDriver::new(&[])), DomainPolicy::open());
        for action in ["get_title", "get_url", "extract_text", "extract_links", "refresh", "back"] {
            let r = tool.execute(params(json!({"action": action}))).await;
            assert_eq!(r.error, Some(ErrorKind::ValidationError), "action {action}");
        }
    }

    #[tokio::test]
    async fn test_extractors() {
        let tool = tool_with(Arc::new(FakeDriver::new(&[A])), DomainPolicy::open());
        tool.execute(params(json!({"action": "navigate", "url": A}))).await;

        let title = tool.execute(params(json!({"action": "get_title"}))).await;
        assert_eq!(title.message, format!("Title of {A}"));

        let text = tool.execute(params(json!({"action": "extract_text", "max_chars": 4}))).await;
        assert_eq!(text.message, "Body");
        assert_eq!(text.data.unwrap()["truncated"], true);

        let links = tool.execute(params(json!({"action": "extract_links"}))).await;
        assert!(links.message.contains(&format!("{A}next")));
    }

    #[tokio::test]
    async fn test_extract_with_selector() {
        let tool = tool_with(Arc::new(FakeDriver::new(&[A])), DomainPolicy::open());
        tool.execute(params(json!({"action": "navigate", "url": A}))).await;

        let items = tool
            .execute(params(json!({"action": "extract", "selector": "li.item"})))
            .await;
        assert!(items.success, "{}", items.message);
        assert_eq!(items.message, "1. <li> one\n2. <li> two");
        let data = items.data.unwrap();
        assert_eq!(data["total"], 2);
        assert_eq!(data["elements"][1]["attributes"]["class"], "item hot");

        let limited = tool
            .execute(params(json!({"action": "extract", "selector": "li", "max_elements": 1})))
            .await;
        assert_eq!(limited.data.unwrap()["elements"].as_array().unwrap().len(), 1);

        let whole = tool.execute(params(json!({"action": "extract"}))).await;
        assert_eq!(whole.message, format!("Body of {A}"));

        let bad = tool
            .execute(params(json!({"action": "extract", "selector": "ul > li"})))
            .await;
        assert_eq!(bad.error, Some(ErrorKind::ValidationError));
        assert!(bad.message.contains("unsupported selector"));
    }

    #[tokio::test]
    async fn test_find_element() {
        let tool = tool_with(Arc::new(FakeDriver::new(&[A])), DomainPolicy::open());
        tool.execute(params(json!({"action": "navigate", "url": A}))).await;

        let found = tool
            .execute(params(json!({"action": "find_element", "selector": "#top"})))
            .await;
        assert!(found.success, "{}", found.message);
        let data = found.data.unwrap();
        assert_eq!(data["element"]["tag"], "h1");
        assert_eq!(data["element"]["text"], format!("Heading of {A}"));

        let missing = tool
            .execute(params(json!({"action": "find_element", "selector": ".nope"})))
            .await;
        assert!(!missing.success);
        assert_eq!(missing.data.unwrap()["found"], false);

        let no_selector = tool.execute(params(json!({"action": "find_element"}))).await;
        assert_eq!(no_selector.error, Some(ErrorKind::ValidationError));
    }

    #[tokio::test]
    async fn test_disallowed_domain_not_loaded() {
        let driver = Arc::new(FakeDriver::new(&[A]));
        let tool = tool_with(driver.clone(), DomainPolicy::new(true, ["b.example"]));
        let r = tool.execute(params(json!({"action": "navigate", "url": A}))).await;
        assert_eq!(r.error, Some(ErrorKind::DomainNotAllowed));
        assert_eq!(driver.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let tool = tool_with(Arc::new(FakeDriver::new(&[])), DomainPolicy::open());
        let r = tool.execute(params(json!({"action": "click"}))).await;
        assert_eq!(r.error, Some(ErrorKind::ValidationError));
        assert!(r.message.contains("navigate"));
    }

    #[tokio::test]
    async fn test_http_driver_renders_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(
                        "<html><head><title>Docs</title></head>\
                         <body><p>Welcome</p><a href=\"intro.html\">Intro</a></body></html>",
                    ),
            )
            .mount(&server)
            .await;

        let domains = Arc::new(DomainPolicy::open());
        let driver = HttpBrowserDriver::new(&BrowserConfig::default(), domains.clone()).unwrap();
        let tool = BrowserTool::new(Arc::new(driver), domains, Duration::from_secs(5));

        let base = format!("{}/docs/", server.uri());
        let nav = tool.execute(params(json!({"action": "navigate", "url": base}))).await;
        assert!(nav.success, "{}", nav.message);
        assert!(nav.message.contains("Docs"));

        let text = tool.execute(params(json!({"action": "extract_text"}))).await;
        assert!(text.message.contains("Welcome"));

        let links = tool.execute(params(json!({"action": "extract_links"}))).await;
        assert!(links.message.contains(&format!("{}/docs/intro.html", server.uri())));

        let para = tool
            .execute(params(json!({"action": "find_element", "selector": "p"})))
            .await;
        assert!(para.message.contains("Welcome"), "{}", para.message);
    }

    #[tokio::test]
    async fn test_http_driver_caps_body() {
        let server = MockServer::start().await;
        let body = format!("<html><body><p>{}</p></body></html>", "y".repeat(500_000));
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let domains = Arc::new(DomainPolicy::open());
        let config = BrowserConfig {
            max_text_chars: 1_000_000,
            ..BrowserConfig::default()
        };
        let driver = HttpBrowserDriver::new(&config, domains)
            .unwrap()
            .with_max_body_bytes(10_000);
        let page = driver.load(&Url::parse(&server.uri()).unwrap()).await.unwrap();
        assert_eq!(page.html.len(), 10_000);
        assert!(page.text.chars().count() <= 10_000);
    }
}
