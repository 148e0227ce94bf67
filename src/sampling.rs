//! Template-based text generation for `sampling/createMessage`.
//!
//! No model is called. The reply is built from the context the host puts in
//! the system prompt: a `Latest information about <SYMBOL>: {json}` line
//! produced by [`system_prompt`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::mcp::protocol::JsonRpcErrorData;
use crate::mcp::registry::SamplingHandler;
use crate::mcp::types::{Content, CreateMessageParams, CreateMessageResult, Role};

/// Text that introduces the coin context inside a system prompt.
pub const CONTEXT_MARKER: &str = "Latest information about";

/// Model reported when the caller expresses no preference.
pub const DEFAULT_MODEL: &str = "default-model";

/// Builds the system prompt carrying `quote` as context for `symbol`.
#[must_use]
pub fn system_prompt(symbol: &str, quote: &Value) -> String {
    format!(
        "You are an AI assistant specialising in cryptocurrency.\n\
         {CONTEXT_MARKER} {symbol}: {quote}.\n\
         Answer briefly and in a friendly tone. Always use the latest price data."
    )
}

/// Generates replies from the price context in the system prompt.
#[derive(Debug, Clone)]
pub struct TemplateSampler {
    symbol_pattern: Regex,
    data_pattern: Regex,
}

impl TemplateSampler {
    /// Compiles the context patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            symbol_pattern: Regex::new(&format!(
                r"{}\s+([A-Za-z0-9]+):",
                regex::escape(CONTEXT_MARKER)
            ))?,
            data_pattern: Regex::new(r"\{.*\}")?,
        })
    }

    /// Builds the reply for `params` as of `now`.
    #[must_use]
    pub fn generate_reply(&self, params: &CreateMessageParams, now: DateTime<Utc>) -> CreateMessageResult {
        let context = params.options.system_prompt.as_deref().unwrap_or_default();

        let symbol = self
            .symbol_pattern
            .captures(context)
            .and_then(|caps| caps.get(1))
            .map_or("unknown", |m| m.as_str());

        let price_sentence = self
            .data_pattern
            .find(context)
            .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
            .and_then(|data| price_sentence(symbol, &data))
            .unwrap_or_else(|| "No price information available.".to_string());

        let text = format!(
            "{price_sentence} Data updated at {} UTC.",
            now.format("%H:%M:%S")
        );

        let (text, stop_reason) = match params.options.max_tokens {
            Some(limit) => truncate_words(&text, usize::try_from(limit).unwrap_or(usize::MAX)),
            None => (text, "endTurn"),
        };

        let model = params
            .options
            .model_preferences
            .as_ref()
            .and_then(|prefs| prefs.hints.first())
            .map_or_else(|| DEFAULT_MODEL.to_string(), |hint| hint.name.clone());

        CreateMessageResult {
            role: Role::Assistant,
            content: Content::text(text),
            model,
            stop_reason: stop_reason.to_string(),
        }
    }
}

fn price_sentence(symbol: &str, data: &Value) -> Option<String> {
    let price = data.get("price").filter(|p| p.is_number() || p.is_string())?;
    let price = price.as_str().map_or_else(|| price.to_string(), str::to_string);
    let currency = data.get("currency").and_then(Value::as_str).unwrap_or("USDT");
    Some(format!("The current price of {symbol} is {price} {currency}."))
}

fn truncate_words(text: &str, limit: usize) -> (String, &'static str) {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        (text.to_string(), "endTurn")
    } else {
        (words[..limit].join(" "), "maxTokens")
    }
}

#[async_trait]
impl SamplingHandler for TemplateSampler {
    async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, JsonRpcErrorData> {
        if params.messages.is_empty() {
            return Err(JsonRpcErrorData::invalid_params(
                "Invalid params: messages must not be empty",
            ));
        }
        if params.options.max_tokens == Some(0) {
            return Err(JsonRpcErrorData::invalid_params(
                "Invalid params: maxTokens must be greater than 0",
            ));
        }

        let reply = self.generate_reply(&params, Utc::now());
        tracing::debug!(model = %reply.model, stop_reason = %reply.stop_reason, "Generated reply");
        Ok(reply)
    }
}
