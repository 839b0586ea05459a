//! The tools offered to the model.
//!
//! Backend tools fetch market data, web results, papers and mail through
//! small capability traits, so each one can run against a canned backend in
//! tests. Frontend tools are only described here and performed by the
//! client.

mod arxiv;
mod frontend;
mod gmail;
mod search;
mod stocks;
mod task_steps;
mod text;

use std::sync::Arc;
use std::time::Duration;

use novus_core::tool::{Error as ToolError, Registry, RegistryError};
use reqwest::{Client, RequestBuilder};

pub use arxiv::{Article, Arxiv, PaperIndex, SearchArxivTool};
pub use frontend::*;
pub use gmail::{
    EmailSummary, Gmail, LatestEmailsTool, Mailbox, OutgoingEmail,
    SendEmailTool,
};
pub use search::{
    DuckDuckGo, DuckDuckGoNewsTool, DuckDuckGoSearchTool, NewsArticle,
    SearchHit, WebSearch,
};
pub use stocks::{
    Chart, CurrentPriceTool, HistoricalPricesTool, MarketData, YahooFinance,
};
pub use task_steps::*;

const USER_AGENT: &str = concat!("novus/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_ERROR_BODY: usize = 200;

/// The error type of the backends behind the local tools.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The upstream service answered with an error status.
    #[error("upstream answered {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        message: String,
    },
    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Payload(String),
}

impl From<BackendError> for ToolError {
    fn from(err: BackendError) -> Self {
        ToolError::execution_error().with_reason(err.to_string())
    }
}

/// Which optional tools to register and how.
#[derive(Clone, Debug, Default)]
pub struct ToolsConfig {
    /// OAuth access token for the Gmail API. Mail tools are only registered
    /// when it is set.
    pub gmail_access_token: Option<String>,
    /// How `generate_task_steps` treats malformed checklists.
    pub task_step_policy: TaskStepPolicy,
}

/// Creates the HTTP client shared by the backends.
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
}

/// Builds the registry with every tool, in the order they are presented to
/// the model.
pub fn build_registry(
    config: &ToolsConfig,
    client: Client,
) -> Result<Registry, RegistryError> {
    let mut registry = Registry::default();

    let market: Arc<dyn MarketData> = Arc::new(YahooFinance::new(client.clone()));
    registry.register_local(CurrentPriceTool::new(Arc::clone(&market)))?;
    registry.register_local(HistoricalPricesTool::new(market))?;

    let web: Arc<dyn WebSearch> = Arc::new(DuckDuckGo::new(client.clone()));
    registry.register_local(DuckDuckGoSearchTool::new(Arc::clone(&web)))?;
    registry.register_local(DuckDuckGoNewsTool::new(web))?;

    registry.register_local(SearchArxivTool::new(Arc::new(Arxiv::new(
        client.clone(),
    ))))?;

    if let Some(token) = &config.gmail_access_token {
        let mailbox: Arc<dyn Mailbox> =
            Arc::new(Gmail::new(client, token.clone()));
        registry.register_local(LatestEmailsTool::new(Arc::clone(&mailbox)))?;
        registry.register_local(SendEmailTool::new(mailbox))?;
    } else {
        info!("GMAIL_ACCESS_TOKEN is not set, mail tools are disabled");
    }

    registry.register_frontend(AddProverbTool::new())?;
    registry.register_frontend(SetThemeColorTool::new())?;
    registry.register_frontend(MeetingCardTool::new())?;
    registry.register_frontend(OpenSupportFormTool::new())?;
    registry.register_frontend(FillSupportFormTool::new())?;
    registry.register_frontend(TaskStepsTool::new(config.task_step_policy))?;

    Ok(registry)
}

/// Sends a request and returns the body of a successful response.
async fn fetch_text(req: RequestBuilder) -> Result<String, BackendError> {
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        let message = body.chars().take(MAX_ERROR_BODY).collect();
        return Err(BackendError::Status {
            status: status.as_u16(),
            message,
        });
    }
    Ok(body)
}

fn parse_json<T: serde::de::DeserializeOwned>(
    body: &str,
) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|err| BackendError::Payload(err.to_string()))
}

fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String, ToolError> {
    serde_json::to_string_pretty(value).map_err(|err| {
        ToolError::execution_error().with_reason(err.to_string())
    })
}
