//! Coin price lookup and the `get_coin_price` tool.
//!
//! Prices come from the Binance public ticker endpoint
//! (`GET /api/v3/ticker/price?symbol=BTCUSDT`). The lookup sits behind
//! [`PriceSource`] so the tool can be exercised without the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::BinanceConfig;
use crate::mcp::protocol::JsonRpcErrorData;
use crate::mcp::registry::{Arguments, ToolHandler};
use crate::mcp::types::{ArgumentDescriptor, ToolDescriptor};

/// Name the tool is registered under.
pub const TOOL_NAME: &str = "get_coin_price";

/// A price quote for one coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// Coin ticker, upper case (`BTC`).
    pub symbol: String,
    /// Last traded price in `currency`.
    pub price: f64,
    /// Market the price was read from (`BTCUSDT`).
    pub trading_pair: String,
    /// When the quote was taken, RFC 3339 UTC.
    pub timestamp: String,
    /// Quote asset (`USDT`).
    pub currency: String,
}

/// Why a price could not be looked up.
#[derive(Error, Debug)]
pub enum PriceError {
    /// The quote service does not list the symbol.
    #[error("invalid symbol or not listed on Binance: {0}")]
    InvalidSymbol(String),

    /// The quote service could not be reached or answered unexpectedly.
    #[error("price service unavailable: {0}")]
    Upstream(String),
}

impl From<PriceError> for JsonRpcErrorData {
    fn from(e: PriceError) -> Self {
        match e {
            PriceError::InvalidSymbol(_) => Self::invalid_params(e.to_string()),
            PriceError::Upstream(_) => Self::internal(format!("Failed to fetch coin price: {e}")),
        }
    }
}

/// Something that can quote a coin price.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Quotes `symbol` (already upper case and alphanumeric).
    async fn quote(&self, symbol: &str) -> Result<PriceQuote, PriceError>;
}

#[async_trait]
impl<T: PriceSource + ?Sized> PriceSource for Arc<T> {
    async fn quote(&self, symbol: &str) -> Result<PriceQuote, PriceError> {
        (**self).quote(symbol).await
    }
}

/// Ticker payload returned by Binance.
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// HTTP client for the Binance ticker API.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    quote_asset: String,
}

impl BinanceClient {
    /// Creates a client for `base_url` quoting in `quote_asset`.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::Upstream`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        quote_asset: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PriceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("binance-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PriceError::Upstream(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            quote_asset: quote_asset.into(),
        })
    }

    /// Creates a client from the `binance` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::Upstream`] if the HTTP client cannot be built.
    pub fn from_config(config: &BinanceConfig) -> Result<Self, PriceError> {
        Self::new(&config.base_url, &config.quote_asset, config.http_timeout())
    }

    /// The asset prices are quoted in.
    #[must_use]
    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }
}

#[async_trait]
impl PriceSource for BinanceClient {
    async fn quote(&self, symbol: &str) -> Result<PriceQuote, PriceError> {
        let pair = format!("{symbol}{}", self.quote_asset);
        let url = format!("{}/api/v3/ticker/price", self.base_url);

        tracing::debug!(%pair, "Fetching ticker price");

        let response = self
            .http
            .get(&url)
            .query(&[("symbol", pair.as_str())])
            .send()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            return Err(PriceError::InvalidSymbol(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(PriceError::Upstream(format!("HTTP {status}")));
        }

        let ticker: TickerPrice = response
            .json()
            .await
            .map_err(|e| PriceError::Upstream(format!("unexpected response: {e}")))?;

        let price: f64 = ticker
            .price
            .parse()
            .map_err(|_| PriceError::Upstream(format!("unparseable price '{}'", ticker.price)))?;

        Ok(PriceQuote {
            symbol: symbol.to_string(),
            price,
            trading_pair: ticker.symbol,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            currency: self.quote_asset.clone(),
        })
    }
}

/// The `get_coin_price` tool.
#[derive(Debug, Clone)]
pub struct CoinPriceTool<P> {
    source: P,
}

impl<P: PriceSource + 'static> CoinPriceTool<P> {
    /// Wraps a price source.
    pub const fn new(source: P) -> Self {
        Self { source }
    }

    /// What `tools/list` advertises for this tool.
    #[must_use]
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            TOOL_NAME,
            "Get the current price of a coin from Binance",
            vec![ArgumentDescriptor::required(
                "symbol",
                "Coin ticker symbol (BTC, ETH, ...)",
            )],
        )
    }
}

#[async_trait]
impl<P: PriceSource + 'static> ToolHandler for CoinPriceTool<P> {
    async fn call(&self, arguments: Arguments) -> Result<Value, JsonRpcErrorData> {
        let symbol = normalise_symbol(arguments.get("symbol"))?;

        let quote = self.source.quote(&symbol).await.map_err(|e| {
            tracing::warn!(%symbol, error = %e, "Price lookup failed");
            JsonRpcErrorData::from(e)
        })?;

        serde_json::to_value(quote)
            .map_err(|e| JsonRpcErrorData::internal(format!("Failed to encode quote: {e}")))
    }
}

/// Upper-cases a ticker symbol and rejects anything that is not a plain
/// alphanumeric string.
///
/// # Errors
///
/// Returns an invalid-params error for missing, non-string or
/// non-alphanumeric symbols.
pub fn normalise_symbol(value: Option<&Value>) -> Result<String, JsonRpcErrorData> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| JsonRpcErrorData::invalid_params("symbol must be a non-empty string"))?;

    if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(JsonRpcErrorData::invalid_params(format!(
            "Invalid symbol: {raw}"
        )));
    }

    Ok(raw.to_ascii_uppercase())
}
