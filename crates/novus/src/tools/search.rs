use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use novus_core::tool::{Tool, ToolResult};
use regex::Regex;
use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::text::clean_text;
use super::{BackendError, fetch_text, parse_json, to_json_text};

const DUCKDUCKGO_URL: &str = "https://duckduckgo.com";
const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const REGION: &str = "wt-wt";
const SAFE_SEARCH_MODERATE: &str = "-1";
const DEFAULT_MAX_RESULTS: usize = 5;

static RESULT_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
        .unwrap()
});
static RESULT_SNIPPET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).unwrap()
});
static VQD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"vqd=["']?(\d+-\d+(?:-\d+)?)"#).unwrap());

/// A web search result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Source URL.
    pub href: String,
    /// Short text of the result.
    pub body: String,
}

/// A news article.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewsArticle {
    /// Publication time in RFC 3339 form.
    pub date: String,
    /// Headline.
    pub title: String,
    /// Excerpt of the article.
    pub body: String,
    /// Article URL.
    pub url: String,
    /// Publisher name.
    pub source: String,
}

/// A web search engine.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Returns up to `max_results` web results for `query`, most relevant
    /// first.
    async fn text(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, BackendError>;

    /// Returns up to `max_results` news articles about `query`, most
    /// relevant first.
    async fn news(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<NewsArticle>, BackendError>;
}

/// Returns the target of a result link. Organic results point at a
/// redirect carrying the target in `uddg`, ads point at `y.js` and are
/// dropped.
fn result_target(href: &str) -> Option<String> {
    let href = clean_text(href);
    let absolute = match href.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => href,
    };
    let url = Url::parse(&absolute).ok()?;
    if url.domain() != Some("duckduckgo.com") {
        return Some(absolute);
    }
    match url.path() {
        "/l/" => url
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned()),
        _ => None,
    }
}

fn parse_html_results(page: &str) -> Vec<SearchHit> {
    let titles: Vec<_> = RESULT_TITLE.captures_iter(page).collect();
    let mut hits = Vec::with_capacity(titles.len());
    for (idx, caps) in titles.iter().enumerate() {
        let Some(href) = result_target(&caps[1]) else {
            continue;
        };
        // The snippet sits between this title and the next one.
        let start = caps.get(0).map_or(0, |m| m.end());
        let end = titles
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(page.len(), |m| m.start());
        let body = RESULT_SNIPPET
            .captures(&page[start..end])
            .map(|snippet| clean_text(&snippet[1]))
            .unwrap_or_default();
        if hits.iter().any(|hit: &SearchHit| hit.href == href) {
            continue;
        }
        hits.push(SearchHit {
            title: clean_text(&caps[2]),
            href,
            body,
        });
    }
    hits
}

fn extract_vqd(page: &str) -> Result<String, BackendError> {
    VQD.captures(page)
        .map(|caps| caps[1].to_owned())
        .ok_or_else(|| {
            BackendError::Payload("no vqd token on the search page".to_owned())
        })
}

#[derive(Deserialize)]
struct NewsResponse {
    #[serde(default)]
    results: Vec<NewsResult>,
}

#[derive(Deserialize)]
struct NewsResult {
    #[serde(default)]
    date: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    excerpt: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    source: String,
}

fn parse_news(body: &str) -> Result<Vec<NewsArticle>, BackendError> {
    let news: NewsResponse = parse_json(body)?;
    let articles = news
        .results
        .into_iter()
        .filter(|result| !result.url.is_empty())
        .map(|result| NewsArticle {
            date: DateTime::from_timestamp(result.date, 0)
                .map(|date| date.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
            title: clean_text(&result.title),
            body: clean_text(&result.excerpt),
            url: result.url,
            source: result.source,
        })
        .collect();
    Ok(articles)
}

/// [`WebSearch`] backed by DuckDuckGo.
///
/// Web results come from the HTML frontend. News come from `news.js`, which
/// needs the `vqd` token of a regular search page for the same query.
pub struct DuckDuckGo {
    client: Client,
    site_url: String,
    html_url: String,
}

impl DuckDuckGo {
    /// Creates the backend with a shared HTTP client.
    #[inline]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            site_url: DUCKDUCKGO_URL.to_owned(),
            html_url: DUCKDUCKGO_HTML_URL.to_owned(),
        }
    }

    #[cfg(test)]
    fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            site_url: base_url.to_owned(),
            html_url: format!("{base_url}/html/"),
        }
    }

    async fn vqd(&self, query: &str) -> Result<String, BackendError> {
        let req = self
            .client
            .get(format!("{}/", self.site_url))
            .query(&[("q", query)]);
        extract_vqd(&fetch_text(req).await?)
    }
}

#[async_trait]
impl WebSearch for DuckDuckGo {
    async fn text(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, BackendError> {
        let req = self
            .client
            .get(&self.html_url)
            .query(&[("q", query), ("kl", REGION)]);
        let mut hits = parse_html_results(&fetch_text(req).await?);
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn news(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<NewsArticle>, BackendError> {
        let vqd = self.vqd(query).await?;
        let req = self
            .client
            .get(format!("{}/news.js", self.site_url))
            .query(&[
                ("l", REGION),
                ("o", "json"),
                ("noamp", "1"),
                ("q", query),
                ("vqd", vqd.as_str()),
                ("p", SAFE_SEARCH_MODERATE),
            ]);
        let mut articles = parse_news(&fetch_text(req).await?)?;
        articles.truncate(max_results);
        Ok(articles)
    }
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

/// Arguments of the DuckDuckGo tools.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchInput {
    /// What to search for.
    #[schemars(description = "The query to search for.")]
    pub query: String,
    /// Result limit.
    #[schemars(description = "The maximum number of results to return, default 5.")]
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// Searches the web.
pub struct DuckDuckGoSearchTool {
    web: Arc<dyn WebSearch>,
    parameter_schema: Value,
}

impl DuckDuckGoSearchTool {
    /// Creates the tool on top of a search engine.
    #[inline]
    pub fn new(web: Arc<dyn WebSearch>) -> Self {
        Self {
            web,
            parameter_schema: schema_for!(SearchInput).to_value(),
        }
    }
}

impl Tool for DuckDuckGoSearchTool {
    type Input = SearchInput;

    fn name(&self) -> &str {
        "duckduckgo_search"
    }

    fn description(&self) -> &str {
        "Use this function to search DuckDuckGo for a query. Every result carries its source URL."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: SearchInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let web = Arc::clone(&self.web);
        async move {
            let hits = web.text(&input.query, input.max_results).await?;
            if hits.is_empty() {
                return Ok(format!("No results found for \"{}\".", input.query));
            }
            to_json_text(&hits)
        }
    }
}

/// Searches the web for news.
pub struct DuckDuckGoNewsTool {
    web: Arc<dyn WebSearch>,
    parameter_schema: Value,
}

impl DuckDuckGoNewsTool {
    /// Creates the tool on top of a search engine.
    #[inline]
    pub fn new(web: Arc<dyn WebSearch>) -> Self {
        Self {
            web,
            parameter_schema: schema_for!(SearchInput).to_value(),
        }
    }
}

impl Tool for DuckDuckGoNewsTool {
    type Input = SearchInput;

    fn name(&self) -> &str {
        "duckduckgo_news"
    }

    fn description(&self) -> &str {
        "Use this function to get the latest news from DuckDuckGo. Every article carries its date, publisher and source URL."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: SearchInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let web = Arc::clone(&self.web);
        async move {
            let articles = web.news(&input.query, input.max_results).await?;
            if articles.is_empty() {
                return Ok(format!("No news found for \"{}\".", input.query));
            }
            to_json_text(&articles)
        }
    }
}
