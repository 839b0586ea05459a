use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use novus_core::tool::{Tool, ToolResult};
use regex::Regex;
use reqwest::Client;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::text::clean_text;
use super::{BackendError, fetch_text, to_json_text};

const ARXIV_URL: &str = "https://export.arxiv.org/api/query";
const DEFAULT_NUM_ARTICLES: usize = 10;

static ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<entry>(.*?)</entry>").unwrap());
static AUTHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<author>\s*<name>(.*?)</name>").unwrap()
});
static PDF_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link[^>]*title="pdf"[^>]*href="([^"]+)""#).unwrap()
});

/// A paper found on arXiv.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Article {
    /// Paper title.
    pub title: String,
    /// Short arXiv id, such as `2302.04761v1`.
    pub id: String,
    /// Full URL of the abstract page.
    pub entry_id: String,
    /// Author names in listed order.
    pub authors: Vec<String>,
    /// Year of first publication.
    pub year: Option<u16>,
    /// Direct link to the PDF.
    pub pdf_url: String,
    /// Abstract.
    pub summary: String,
}

/// An index of research papers.
#[async_trait]
pub trait PaperIndex: Send + Sync {
    /// Returns up to `max_results` papers matching `query`, most relevant
    /// first.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<Article>, BackendError>;
}

fn tag_text<'a>(entry: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let start = entry.find(&open)?;
    let body_start = start + entry[start..].find('>')? + 1;
    let close = format!("</{tag}>");
    let body_len = entry[body_start..].find(&close)?;
    Some(&entry[body_start..body_start + body_len])
}

fn parse_entry(entry: &str) -> Result<Article, BackendError> {
    let entry_id = tag_text(entry, "id")
        .map(clean_text)
        .ok_or_else(|| BackendError::Payload("entry without an id".to_owned()))?;
    let id = entry_id
        .rsplit_once("/abs/")
        .map(|(_, id)| id.to_owned())
        .unwrap_or_else(|| entry_id.clone());
    let year = tag_text(entry, "published")
        .and_then(|published| published.trim().get(..4))
        .and_then(|year| year.parse().ok());
    let pdf_url = match PDF_LINK.captures(entry) {
        Some(caps) => caps[1].to_owned(),
        None => entry_id.replacen("/abs/", "/pdf/", 1),
    };

    Ok(Article {
        title: tag_text(entry, "title").map(clean_text).unwrap_or_default(),
        authors: AUTHOR
            .captures_iter(entry)
            .map(|caps| clean_text(&caps[1]))
            .collect(),
        summary: tag_text(entry, "summary")
            .map(clean_text)
            .unwrap_or_default(),
        id,
        entry_id,
        year,
        pdf_url,
    })
}

fn parse_feed(feed: &str) -> Result<Vec<Article>, BackendError> {
    ENTRY
        .captures_iter(feed)
        .map(|caps| parse_entry(&caps[1]))
        .collect()
}

/// [`PaperIndex`] backed by the arXiv export API.
pub struct Arxiv {
    client: Client,
    base_url: String,
}

impl Arxiv {
    /// Creates the backend with a shared HTTP client.
    #[inline]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: ARXIV_URL.to_owned(),
        }
    }
}

#[async_trait]
impl PaperIndex for Arxiv {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<Article>, BackendError> {
        let req = self.client.get(&self.base_url).query(&[
            ("search_query", format!("all:{query}")),
            ("start", "0".to_owned()),
            ("max_results", max_results.to_string()),
            ("sortBy", "relevance".to_owned()),
        ]);
        parse_feed(&fetch_text(req).await?)
    }
}

fn default_num_articles() -> usize {
    DEFAULT_NUM_ARTICLES
}

/// Arguments of `search_arxiv_and_return_articles`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchArxivInput {
    /// What to search for.
    #[schemars(description = "The query to search arXiv for.")]
    pub query: String,
    /// Result limit.
    #[schemars(description = "The number of articles to return, default 10.")]
    #[serde(default = "default_num_articles")]
    pub num_articles: usize,
}

/// Searches arXiv for papers.
pub struct SearchArxivTool {
    index: Arc<dyn PaperIndex>,
    parameter_schema: Value,
}

impl SearchArxivTool {
    /// Creates the tool on top of a paper index.
    #[inline]
    pub fn new(index: Arc<dyn PaperIndex>) -> Self {
        Self {
            index,
            parameter_schema: schema_for!(SearchArxivInput).to_value(),
        }
    }
}

impl Tool for SearchArxivTool {
    type Input = SearchArxivInput;

    fn name(&self) -> &str {
        "search_arxiv_and_return_articles"
    }

    fn description(&self) -> &str {
        r#"
Use this function to search arXiv for a query and return the top articles.
Each article has a title, id, authors, pdf_url and summary."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: SearchArxivInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let index = Arc::clone(&self.index);
        async move {
            let articles = index.search(&input.query, input.num_articles).await?;
            if articles.is_empty() {
                return Ok(format!(
                    "No articles found on arXiv for \"{}\".",
                    input.query
                ));
            }
            to_json_text(&articles)
        }
    }
}
