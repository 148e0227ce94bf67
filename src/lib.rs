//! binance-mcp: a Model Context Protocol client and server for coin prices
//!
//! Both ends speak JSON-RPC 2.0 over a WebSocket. The server exposes one
//! tool, one prompt and a sampling handler; the client drives the
//! handshake and correlates responses to requests.
//!
//! # Architecture
//!
//! The protocol engine knows nothing about coins. Domain behaviour plugs in
//! through the method registry:
//!
//! - **`get_coin_price`**: price lookup against the Binance ticker API
//! - **`coin_price_analysis`**: prompt template embedding price data
//! - **`sampling/createMessage`**: template replies built from price context
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol engine (client, server, correlator)
//! - [`binance`]: Price lookup and the price tool
//! - [`prompts`]: Prompt handlers
//! - [`sampling`]: Text generation handler
//! - [`host`]: Interactive chat host

use std::sync::Arc;

pub mod binance;
pub mod config;
pub mod error;
pub mod host;
pub mod mcp;
pub mod prompts;
pub mod sampling;

use binance::{CoinPriceTool, PriceSource};
use mcp::registry::MethodRegistry;
use prompts::CoinAnalysisPrompt;
use sampling::TemplateSampler;

/// The registry the server exposes, with prices from `prices`.
///
/// # Errors
///
/// Returns an error if the sampler's patterns fail to compile.
pub fn default_registry<P: PriceSource + 'static>(
    prices: P,
) -> Result<MethodRegistry, regex::Error> {
    Ok(MethodRegistry::new()
        .with_tool(
            CoinPriceTool::<P>::descriptor(),
            Arc::new(CoinPriceTool::new(prices)),
        )
        .with_prompt(CoinAnalysisPrompt::descriptor(), Arc::new(CoinAnalysisPrompt))
        .with_sampler(Arc::new(TemplateSampler::new()?)))
}
