//! Web tools — search (Tavily API), fetch, extract, and analyze.
//!
//! All of them respect `security.allowNetwork`. The page tools also check
//! the target host, and every redirect hop, against
//! `security.allowedDomains`, and stop reading a body at a byte cap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use sunalite_core::config::schema::SearchConfig;

use super::base::{optional_bool, optional_string, optional_u64, require_string, Tool, ToolParams};
use super::html::{analyze, extract_images, extract_links, extract_tables, html_to_text, looks_like_html};
use crate::error::{ErrorKind, ToolError, ToolResult};
use crate::policy::{DomainPolicy, PolicyViolation};

/// Max chars returned by `web_fetch` unless the caller asks for fewer.
pub const DEFAULT_MAX_CHARS: usize = 50_000;

/// Bytes of a response body read before the rest is dropped.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Items per category returned by `web_extract` unless the caller asks for fewer.
const DEFAULT_MAX_ITEMS: usize = 50;

/// Data rows kept per table by `web_extract`.
const MAX_TABLE_ROWS: usize = 10;

/// What `web_extract` can pull out of a page.
pub const EXTRACT_KINDS: &[&str] = &["text", "links", "images", "tables", "all"];

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

/// Bounds for `max_results`.
const MAX_SEARCH_RESULTS: u64 = 10;

// ─────────────────────────────────────────────
// Shared HTTP plumbing
// ─────────────────────────────────────────────

/// Build a client whose redirects are re-checked against `domains`.
pub(crate) fn guarded_client(
    user_agent: &str,
    timeout: Duration,
    domains: Arc<DomainPolicy>,
) -> reqwest::Result<Client> {
    let redirect = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("stopped after {MAX_REDIRECTS} redirects"));
        }
        match domains.check_url(attempt.url().as_str()) {
            Ok(_) => attempt.follow(),
            Err(violation) => attempt.error(violation),
        }
    });

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(redirect)
        .build()
}

/// Classify a transport error, surfacing policy rejections from redirects.
pub(crate) fn request_error(err: reqwest::Error, target: &str) -> ToolError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(current) = source {
        if let Some(violation) = current.downcast_ref::<PolicyViolation>() {
            return ToolError::from(violation.clone());
        }
        source = current.source();
    }

    if err.is_timeout() {
        ToolError::new(ErrorKind::Timeout, format!("Timeout: request to {target} timed out"))
    } else {
        ToolError::execution(format!("Request to {target} failed: {err}"))
    }
}

/// Read a response body as text, stopping after `cap` bytes.
///
/// Returns `true` alongside the text when the body was cut.
pub(crate) async fn read_body_capped(
    resp: Response,
    cap: usize,
    target: &str,
) -> Result<(String, bool), ToolError> {
    let mut stream = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| request_error(e, target))?;
        let room = cap.saturating_sub(buf.len());
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    if truncated {
        warn!(target, cap, "response body cut at byte cap");
    }
    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

/// A response whose body was read under the byte cap.
pub(crate) struct Fetched {
    pub status: StatusCode,
    /// URL after redirects.
    pub final_url: Url,
    pub content_type: String,
    pub body: String,
    pub body_truncated: bool,
}

impl Fetched {
    pub fn is_html(&self) -> bool {
        looks_like_html(&self.content_type, &self.body)
    }

    pub fn is_error_status(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }
}

/// GET `url` (already policy-checked) and read at most `cap` body bytes.
pub(crate) async fn fetch_capped(client: &Client, url: &Url, cap: usize) -> Result<Fetched, ToolError> {
    let resp = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| request_error(e, url.as_str()))?;

    let status = resp.status();
    let final_url = resp.url().clone();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let (body, body_truncated) = read_body_capped(resp, cap, url.as_str()).await?;

    Ok(Fetched {
        status,
        final_url,
        content_type,
        body,
        body_truncated,
    })
}

/// Policy-checked page loading shared by `web_fetch`, `web_extract`, and
/// `web_analyze`.
#[derive(Clone)]
pub(crate) struct PageClient {
    client: Client,
    domains: Arc<DomainPolicy>,
    max_body_bytes: usize,
}

impl PageClient {
    pub fn new(domains: Arc<DomainPolicy>, user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: guarded_client(user_agent, timeout, domains.clone())?,
            domains,
            max_body_bytes: MAX_BODY_BYTES,
        })
    }

    pub async fn get(&self, raw_url: &str) -> Result<Fetched, ToolError> {
        let url = self.domains.check_url(raw_url)?;
        debug!(url = %url, "fetching web page");
        fetch_capped(&self.client, &url, self.max_body_bytes).await
    }

    /// Like [`get`](Self::get), but only successful HTML responses pass.
    pub async fn get_html(&self, raw_url: &str) -> Result<Fetched, ToolError> {
        let page = self.get(raw_url).await?;
        if page.is_error_status() {
            return Err(ToolError::execution(format!(
                "{} returned HTTP {}",
                page.final_url, page.status
            )));
        }
        if !page.is_html() {
            return Err(ToolError::validation(format!(
                "{} is not an HTML page (content-type '{}'); use web_fetch instead",
                page.final_url, page.content_type
            )));
        }
        Ok(page)
    }
}

/// Keep the first `max_chars` characters.
pub(crate) fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text, false),
    }
}

// ─────────────────────────────────────────────
// WebSearchTool (Tavily API)
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

/// Searches the web using the Tavily search API.
pub struct WebSearchTool {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    default_max_results: u64,
    domains: Arc<DomainPolicy>,
    timeout: Duration,
}

impl WebSearchTool {
    pub fn new(
        search: &SearchConfig,
        domains: Arc<DomainPolicy>,
        user_agent: &str,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = Client::builder().user_agent(user_agent).timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: Some(search.api_key.trim().to_string()).filter(|k| !k.is_empty()),
            api_url: search.api_url.clone(),
            default_max_results: (search.max_results as u64).clamp(1, MAX_SEARCH_RESULTS),
            domains,
            timeout,
        })
    }

    async fn search(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let query = require_string(&params, "query")?;
        if query.trim().is_empty() {
            return Err(ToolError::validation("Parameter 'query' must not be empty"));
        }
        let max_results = optional_u64(&params, "max_results")?
            .unwrap_or(self.default_max_results)
            .clamp(1, MAX_SEARCH_RESULTS);
        let depth = optional_string(&params, "search_depth")?.unwrap_or_else(|| "basic".into());
        if depth != "basic" && depth != "advanced" {
            return Err(ToolError::validation(format!(
                "Parameter 'search_depth' must be 'basic' or 'advanced', got '{depth}'"
            )));
        }
        let include_answer = optional_bool(&params, "include_answer")?.unwrap_or(true);

        self.domains.network_enabled()?;
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ToolError::execution("No search API key configured (set search.apiKey or TAVILY_API_KEY)")
        })?;

        debug!(query = %query, max_results, depth = %depth, "searching web");

        let resp = self
            .client
            .post(&self.api_url)
            .json(&json!({
                "api_key": api_key,
                "query": query,
                "max_results": max_results,
                "search_depth": depth,
                "include_answer": include_answer,
            }))
            .send()
            .await
            .map_err(|e| request_error(e, "the search API"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let (body, _) = truncate_chars(body, 500);
            return Err(ToolError::execution(format!(
                "Search API returned {status}: {body}"
            )));
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::execution(format!("Failed to parse search response: {e}")))?;

        let mut lines = Vec::new();
        if let Some(answer) = parsed.answer.as_deref().filter(|a| !a.is_empty()) {
            lines.push(format!("Answer: {answer}"));
        }
        for (i, hit) in parsed.results.iter().enumerate() {
            let title = if hit.title.is_empty() { "(no title)" } else { hit.title.as_str() };
            lines.push(format!("{}. {}\n   {}\n   {}", i + 1, title, hit.url, hit.content));
        }
        let message = if parsed.results.is_empty() {
            format!("No results found for '{query}'.")
        } else {
            lines.join("\n\n")
        };

        let results: Vec<Value> = parsed
            .results
            .iter()
            .map(|h| json!({"title": h.title, "url": h.url, "content": h.content, "score": h.score}))
            .collect();

        Ok(ToolResult::ok(message).with_data(json!({
            "query": query,
            "answer": parsed.answer,
            "results": results,
        })))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a numbered list of results with titles, URLs, and snippets, \
         plus a short answer when available."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results (1-10)",
                    "minimum": 1,
                    "maximum": MAX_SEARCH_RESULTS
                },
                "search_depth": {
                    "type": "string",
                    "enum": ["basic", "advanced"],
                    "description": "Search depth (default: basic)"
                },
                "include_answer": {
                    "type": "boolean",
                    "description": "Include a generated short answer (default: true)"
                }
            },
            "required": ["query"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.search(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// WebFetchTool
// ─────────────────────────────────────────────

/// Fetches a URL and extracts readable content.
pub struct WebFetchTool {
    pages: PageClient,
    timeout: Duration,
}

impl WebFetchTool {
    pub fn new(domains: Arc<DomainPolicy>, user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            pages: PageClient::new(domains, user_agent, timeout)?,
            timeout,
        })
    }

    /// Override the body byte cap.
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.pages.max_body_bytes = bytes.max(1);
        self
    }

    async fn fetch(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let raw_url = require_string(&params, "url")?;
        let max_chars = optional_u64(&params, "max_chars")?
            .map(|n| (n as usize).max(100))
            .unwrap_or(DEFAULT_MAX_CHARS);

        let page = self.pages.get(&raw_url).await?;
        let final_url = page.final_url.to_string();
        let is_html = page.is_html();
        let is_error = page.is_error_status();
        let Fetched {
            status,
            content_type,
            body,
            body_truncated,
            ..
        } = page;

        let (text, extractor) = if content_type.contains("json") && !body_truncated {
            match serde_json::from_str::<Value>(&body) {
                Ok(v) => (serde_json::to_string_pretty(&v).unwrap_or(body), "json"),
                Err(_) => (body, "raw"),
            }
        } else if is_html {
            (html_to_text(&body), "html")
        } else {
            (body, "raw")
        };

        let (text, cut) = truncate_chars(text, max_chars);
        let truncated = cut || body_truncated;
        let length = text.chars().count();
        let data = json!({
            "url": raw_url,
            "finalUrl": final_url,
            "status": status.as_u16(),
            "contentType": content_type,
            "extractor": extractor,
            "truncated": truncated,
            "bodyTruncated": body_truncated,
            "length": length,
            "text": text,
        });

        if is_error {
            return Ok(ToolResult::failure(
                ErrorKind::ExecutionFailed,
                format!("{final_url} returned HTTP {status}"),
            )
            .with_data(data));
        }

        Ok(ToolResult::ok(format!(
            "Fetched {final_url} (HTTP {}, {length} chars{})",
            status.as_u16(),
            if truncated { ", truncated" } else { "" }
        ))
        .with_data(data))
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its readable content. \
         HTML is converted to text and JSON is pretty-printed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 50000)",
                    "minimum": 100
                }
            },
            "required": ["url"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.fetch(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// WebExtractTool
// ─────────────────────────────────────────────

/// Pulls structured content (text, links, images, tables) out of a page.
pub struct WebExtractTool {
    pages: PageClient,
    timeout: Duration,
}

impl WebExtractTool {
    pub fn new(domains: Arc<DomainPolicy>, user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            pages: PageClient::new(domains, user_agent, timeout)?,
            timeout,
        })
    }

    async fn extract(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let raw_url = require_string(&params, "url")?;
        let kind = optional_string(&params, "extract")?.unwrap_or_else(|| "all".into());
        if !EXTRACT_KINDS.contains(&kind.as_str()) {
            return Err(ToolError::validation(format!(
                "Parameter 'extract' must be one of {}, got '{kind}'",
                EXTRACT_KINDS.join(", ")
            )));
        }
        let max_items = optional_u64(&params, "max_items")?
            .map(|n| (n as usize).max(1))
            .unwrap_or(DEFAULT_MAX_ITEMS);

        let page = self.pages.get_html(&raw_url).await?;
        let wants = |k: &str| kind == k || kind == "all";

        let mut data = json!({
            "url": raw_url,
            "finalUrl": page.final_url.as_str(),
            "extract": kind,
            "bodyTruncated": page.body_truncated,
        });
        let mut summary = Vec::new();

        if wants("text") {
            let (text, truncated) = truncate_chars(html_to_text(&page.body), DEFAULT_MAX_CHARS);
            summary.push(format!("{} chars of text", text.chars().count()));
            data["text"] = json!(text);
            data["textTruncated"] = json!(truncated);
        }
        if wants("links") {
            let mut links = extract_links(&page.body, &page.final_url);
            summary.push(format!("{} links", links.len()));
            links.truncate(max_items);
            data["links"] = json!(links);
        }
        if wants("images") {
            let mut images = extract_images(&page.body, &page.final_url);
            summary.push(format!("{} images", images.len()));
            images.truncate(max_items);
            data["images"] = json!(images);
        }
        if wants("tables") {
            let mut tables = extract_tables(&page.body, MAX_TABLE_ROWS);
            summary.push(format!("{} tables", tables.len()));
            tables.truncate(max_items);
            data["tables"] = json!(tables);
        }

        Ok(ToolResult::ok(format!(
            "Extracted from {}: {}",
            page.final_url,
            summary.join(", ")
        ))
        .with_data(data))
    }
}

#[async_trait]
impl Tool for WebExtractTool {
    fn name(&self) -> &str {
        "web_extract"
    }

    fn description(&self) -> &str {
        "Extract structured content from an HTML page: readable text, links, images, \
         and tables (first row as headers). Results are in the data field."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL of the page"
                },
                "extract": {
                    "type": "string",
                    "enum": EXTRACT_KINDS,
                    "description": "What to extract (default: all)"
                },
                "max_items": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum links, images, or tables returned (default 50)"
                }
            },
            "required": ["url"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.extract(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// WebAnalyzeTool
// ─────────────────────────────────────────────

/// Summarizes a page's structure: headings, element counts, keywords.
pub struct WebAnalyzeTool {
    pages: PageClient,
    timeout: Duration,
}

impl WebAnalyzeTool {
    pub fn new(domains: Arc<DomainPolicy>, user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            pages: PageClient::new(domains, user_agent, timeout)?,
            timeout,
        })
    }

    async fn analyze_page(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let raw_url = require_string(&params, "url")?;
        let page = self.pages.get_html(&raw_url).await?;
        let analysis = analyze(&page.body);

        let keywords: Vec<&str> = analysis.top_keywords.iter().map(|k| k.word.as_str()).collect();
        let message = format!(
            "{} — {}\n{} links, {} images, {} tables, {} forms; {} chars of text\nKeywords: {}",
            page.final_url,
            analysis.title.as_deref().unwrap_or("(untitled page)"),
            analysis.links,
            analysis.images,
            analysis.tables,
            analysis.forms,
            analysis.text_length,
            if keywords.is_empty() { "(none)".to_string() } else { keywords.join(", ") },
        );

        let mut data = json!(analysis);
        data["url"] = json!(raw_url);
        data["finalUrl"] = json!(page.final_url.as_str());
        data["domain"] = json!(page.final_url.host_str());
        data["bodyTruncated"] = json!(page.body_truncated);
        Ok(ToolResult::ok(message).with_data(data))
    }
}

#[async_trait]
impl Tool for WebAnalyzeTool {
    fn name(&self) -> &str {
        "web_analyze"
    }

    fn description(&self) -> &str {
        "Analyze an HTML page's structure: title, heading counts, links, images, tables, \
         forms, scripts, stylesheets, text length, and the most frequent keywords."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL of the page"
                }
            },
            "required": ["url"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.analyze_page(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
