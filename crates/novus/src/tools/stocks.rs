use std::sync::Arc;

use async_trait::async_trait;
use novus_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::Client;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{BackendError, to_json_text};

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

const PERIODS: &[&str] = &[
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];
const INTERVALS: &[&str] = &[
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo",
    "3mo",
];

/// Source of price charts.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Returns the chart of `symbol` over `period`, sampled every `interval`.
    async fn chart(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Chart, BackendError>;
}

/// Chart data in the shape of the Yahoo Finance chart API.
#[derive(Clone, Debug, Deserialize)]
pub struct Chart {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: String,
    #[serde(default)]
    regular_market_price: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<Chart>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

impl Chart {
    /// Returns the latest traded price.
    pub fn current_price(&self) -> Option<f64> {
        self.meta.regular_market_price.or_else(|| {
            let quote = self.indicators.quote.first()?;
            quote.close.iter().rev().find_map(|close| *close)
        })
    }

    /// Returns the rows keyed by timestamp in milliseconds, oldest first.
    ///
    /// Rows without a close price are skipped, Yahoo emits them for the
    /// current, unfinished interval.
    pub fn history(&self) -> Map<String, Value> {
        let mut rows = Map::new();
        let Some(quote) = self.indicators.quote.first() else {
            return rows;
        };
        for (idx, ts) in self.timestamp.iter().enumerate() {
            let at = |values: &[Option<f64>]| values.get(idx).copied().flatten();
            let Some(close) = at(&quote.close) else {
                continue;
            };
            rows.insert(
                (ts * 1000).to_string(),
                json!({
                    "Open": at(&quote.open),
                    "High": at(&quote.high),
                    "Low": at(&quote.low),
                    "Close": close,
                    "Volume": quote.volume.get(idx).copied().flatten(),
                }),
            );
        }
        rows
    }
}

fn parse_chart(body: &str) -> Result<Chart, BackendError> {
    let envelope: ChartEnvelope = super::parse_json(body)?;
    if let Some(err) = envelope.chart.error {
        return Err(BackendError::Payload(format!(
            "{}: {}",
            err.code, err.description
        )));
    }
    envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| BackendError::Payload("empty chart".to_owned()))
}

/// [`MarketData`] backed by the public Yahoo Finance chart API.
pub struct YahooFinance {
    client: Client,
    base_url: String,
}

impl YahooFinance {
    /// Creates the backend with a shared HTTP client.
    #[inline]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: YAHOO_CHART_URL.to_owned(),
        }
    }
}

#[async_trait]
impl MarketData for YahooFinance {
    async fn chart(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Chart, BackendError> {
        let url = format!("{}/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(url)
            .query(&[("range", period), ("interval", interval)])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        // Error payloads come with 4xx statuses and carry the useful message.
        parse_chart(&body).map_err(|err| match err {
            BackendError::Payload(message) if !status.is_success() => {
                BackendError::Status {
                    status: status.as_u16(),
                    message,
                }
            }
            err => err,
        })
    }
}

/// Arguments of `get_current_stock_price`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CurrentPriceInput {
    /// Ticker symbol.
    #[schemars(description = "The stock symbol, e.g. AAPL.")]
    pub symbol: String,
}

/// Returns the current price of a stock.
pub struct CurrentPriceTool {
    market: Arc<dyn MarketData>,
    parameter_schema: Value,
}

impl CurrentPriceTool {
    /// Creates the tool on top of a market data source.
    #[inline]
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self {
            market,
            parameter_schema: schema_for!(CurrentPriceInput).to_value(),
        }
    }
}

impl Tool for CurrentPriceTool {
    type Input = CurrentPriceInput;

    fn name(&self) -> &str {
        "get_current_stock_price"
    }

    fn description(&self) -> &str {
        "Use this function to get the current stock price for a given symbol."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: CurrentPriceInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let market = Arc::clone(&self.market);
        async move {
            let symbol = input.symbol.trim().to_uppercase();
            let chart = market.chart(&symbol, "1d", "1d").await?;
            let price = chart.current_price().ok_or_else(|| {
                ToolError::execution_error()
                    .with_reason(format!("no price available for {symbol}"))
            })?;
            Ok(format!("{price:.4}"))
        }
    }
}

fn default_period() -> String {
    "1mo".to_owned()
}

fn default_interval() -> String {
    "1d".to_owned()
}

/// Arguments of `get_historical_stock_prices`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct HistoricalPricesInput {
    /// Ticker symbol.
    #[schemars(description = "The stock symbol, e.g. AAPL.")]
    pub symbol: String,
    /// Time span to cover.
    #[schemars(
        description = "The period to fetch. Valid periods: 1d,5d,1mo,3mo,6mo,1y,2y,5y,10y,ytd,max. Defaults to 1mo."
    )]
    #[serde(default = "default_period")]
    pub period: String,
    /// Sampling interval.
    #[schemars(
        description = "The interval between data points. Valid intervals: 1d,5d,1wk,1mo,3mo. Defaults to 1d."
    )]
    #[serde(default = "default_interval")]
    pub interval: String,
}

/// Returns price history as a JSON table keyed by timestamp.
pub struct HistoricalPricesTool {
    market: Arc<dyn MarketData>,
    parameter_schema: Value,
}

impl HistoricalPricesTool {
    /// Creates the tool on top of a market data source.
    #[inline]
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self {
            market,
            parameter_schema: schema_for!(HistoricalPricesInput).to_value(),
        }
    }
}

impl Tool for HistoricalPricesTool {
    type Input = HistoricalPricesInput;

    fn name(&self) -> &str {
        "get_historical_stock_prices"
    }

    fn description(&self) -> &str {
        r#"
Use this function to get the historical stock price for a given symbol.
Returns a JSON object keyed by timestamp in milliseconds, each entry holding
the Open, High, Low, Close and Volume of the interval."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: HistoricalPricesInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let market = Arc::clone(&self.market);
        async move {
            if !PERIODS.contains(&input.period.as_str()) {
                return Err(ToolError::invalid_argument()
                    .with_reason(format!("unsupported period `{}`", input.period)));
            }
            if !INTERVALS.contains(&input.interval.as_str()) {
                return Err(ToolError::invalid_argument().with_reason(format!(
                    "unsupported interval `{}`",
                    input.interval
                )));
            }

            let symbol = input.symbol.trim().to_uppercase();
            let chart = market
                .chart(&symbol, &input.period, &input.interval)
                .await?;
            debug!("got {} chart rows for {}", chart.timestamp.len(), chart.meta.symbol);
            to_json_text(&chart.history())
        }
    }
}
