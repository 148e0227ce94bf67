//! Interactive host: turns questions about coin prices into tool calls and
//! sampling requests against a connected [`McpClient`].

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::binance::TOOL_NAME;
use crate::error::{ClientError, HostError};
use crate::mcp::client::McpClient;
use crate::mcp::types::{CreateMessageOptions, Message, ModelHint, ModelPreferences};
use crate::sampling::system_prompt;

/// Coin names and tickers the host recognises, with their symbols.
pub const COINS: &[(&str, &str)] = &[
    ("bitcoin", "BTC"),
    ("btc", "BTC"),
    ("ethereum", "ETH"),
    ("eth", "ETH"),
    ("binance", "BNB"),
    ("bnb", "BNB"),
    ("solana", "SOL"),
    ("sol", "SOL"),
    ("xrp", "XRP"),
    ("cardano", "ADA"),
    ("ada", "ADA"),
    ("dogecoin", "DOGE"),
    ("doge", "DOGE"),
];

const NO_COIN_REPLY: &str = "Sorry, I could not tell which coin you are asking about. \
    Please try again with a specific coin name (for example Bitcoin, ETH or BNB).";

/// Finds the first known coin mentioned in `query` as a whole word.
#[must_use]
pub fn extract_coin_symbol(query: &str) -> Option<&'static str> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            COINS
                .iter()
                .find(|(name, _)| *name == word)
                .map(|(_, symbol)| *symbol)
        })
}

/// A chat front end over a ready client.
#[derive(Debug)]
pub struct ChatHost<'a> {
    client: &'a McpClient,
}

impl<'a> ChatHost<'a> {
    /// Wraps a connected client.
    #[must_use]
    pub const fn new(client: &'a McpClient) -> Self {
        Self { client }
    }

    /// Answers one question. Failures become an apology, never an error.
    pub async fn process_query(&self, query: &str) -> String {
        let Some(symbol) = extract_coin_symbol(query) else {
            return NO_COIN_REPLY.to_string();
        };

        match self.reply_for(symbol, query).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(%symbol, error = %e, "Failed to answer query");
                format!(
                    "Sorry, I could not get price information for {symbol} right now. \
                     Please try again later."
                )
            }
        }
    }

    /// Fetches the price of `symbol` and asks the server to phrase a reply.
    ///
    /// # Errors
    ///
    /// Returns the failure of either request.
    pub async fn reply_for(&self, symbol: &str, query: &str) -> Result<String, ClientError> {
        let quote = self
            .client
            .call_tool(TOOL_NAME, json!({ "symbol": symbol }))
            .await?;

        let reply = self
            .client
            .create_message(vec![Message::user(query)], reply_options(symbol, &quote))
            .await?;

        Ok(reply.content.as_text().unwrap_or_default().to_string())
    }

    /// Runs the read-eval-print loop until `exit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if reading input or writing output fails.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        output
            .write_all(
                b"Welcome to the Binance coin price chatbot!\n\
                  Ask about a coin price or type \"exit\" to quit.\n\n",
            )
            .await?;

        let mut lines = input.lines();
        loop {
            output.write_all(b"You: ").await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            if query.eq_ignore_ascii_case("exit") {
                output.write_all(b"Goodbye!\n").await?;
                break;
            }

            let reply = self.process_query(query).await;
            output
                .write_all(format!("Chatbot: {reply}\n\n").as_bytes())
                .await?;
        }

        output.flush().await
    }
}

fn reply_options(symbol: &str, quote: &Value) -> CreateMessageOptions {
    CreateMessageOptions {
        system_prompt: Some(system_prompt(symbol, quote)),
        model_preferences: Some(ModelPreferences {
            hints: vec![ModelHint {
                name: "gpt-4".to_string(),
            }],
            intelligence_priority: Some(0.8),
        }),
        max_tokens: Some(200),
    }
}

/// Scripted walk through every client operation, printing each result.
///
/// # Errors
///
/// Returns the first request or output failure.
pub async fn probe<W: AsyncWrite + Unpin>(client: &McpClient, mut output: W) -> Result<(), HostError> {
    let tools = client.list_tools().await?;
    write_section(&mut output, "Tools", &serde_json::to_value(&tools)?).await?;

    let prompts = client.list_prompts().await?;
    write_section(&mut output, "Prompts", &serde_json::to_value(&prompts)?).await?;

    let quote = client.call_tool(TOOL_NAME, json!({ "symbol": "BTC" })).await?;
    write_section(&mut output, "BTC price", &quote).await?;

    let analysis = client
        .get_prompt(
            crate::prompts::PROMPT_NAME,
            json!({ "symbol": "BTC", "price_data": quote }),
        )
        .await?;
    write_section(&mut output, "Analysis prompt", &serde_json::to_value(&analysis)?).await?;

    let reply = client
        .create_message(
            vec![Message::user("What is the current price of Bitcoin?")],
            reply_options("BTC", &quote),
        )
        .await?;
    write_section(&mut output, "Generated reply", &serde_json::to_value(&reply)?).await?;

    output.flush().await?;
    Ok(())
}

async fn write_section<W: AsyncWrite + Unpin>(
    output: &mut W,
    title: &str,
    value: &Value,
) -> Result<(), HostError> {
    let body = serde_json::to_string_pretty(value)?;
    output
        .write_all(format!("{title}:\n{body}\n\n").as_bytes())
        .await?;
    Ok(())
}
