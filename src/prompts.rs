//! The `coin_price_analysis` prompt.

use async_trait::async_trait;
use serde_json::Value;

use crate::mcp::protocol::JsonRpcErrorData;
use crate::mcp::registry::{Arguments, PromptHandler};
use crate::mcp::types::{ArgumentDescriptor, GetPromptResult, Message, PromptDescriptor};

/// Name the prompt is registered under.
pub const PROMPT_NAME: &str = "coin_price_analysis";

/// Builds a user message asking for an analysis of a coin's price data.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinAnalysisPrompt;

impl CoinAnalysisPrompt {
    /// What `prompts/list` advertises for this prompt.
    #[must_use]
    pub fn descriptor() -> PromptDescriptor {
        PromptDescriptor::new(
            PROMPT_NAME,
            "Analyse the price of a coin",
            vec![
                ArgumentDescriptor::required("symbol", "Coin ticker symbol"),
                ArgumentDescriptor::required("price_data", "Price data to analyse"),
            ],
        )
    }
}

#[async_trait]
impl PromptHandler for CoinAnalysisPrompt {
    async fn render(&self, arguments: Arguments) -> Result<GetPromptResult, JsonRpcErrorData> {
        let symbol = match arguments.get("symbol") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(JsonRpcErrorData::invalid_params("Missing required argument: symbol")),
        };
        let price_data = arguments
            .get("price_data")
            .ok_or_else(|| JsonRpcErrorData::invalid_params("Missing required argument: price_data"))?;

        Ok(GetPromptResult {
            description: "Coin price analysis".to_string(),
            messages: vec![Message::user(format!(
                "Analyse the current price of {symbol} based on the following data: {price_data}"
            ))],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::{Content, Role};
    use serde_json::json;

    #[tokio::test]
    async fn renders_price_data_as_json() {
        let arguments = json!({
            "symbol": "BTC",
            "price_data": {"price": 67000.12}
        });
        let result = CoinAnalysisPrompt
            .render(arguments.as_object().cloned().unwrap())
            .await
            .unwrap();

        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, Role::User);
        assert_eq!(
            result.messages[0].content,
            Content::text(
                r#"Analyse the current price of BTC based on the following data: {"price":67000.12}"#
            )
        );
    }

    #[test]
    fn descriptor_requires_both_arguments() {
        let descriptor = CoinAnalysisPrompt::descriptor();
        assert_eq!(descriptor.name, PROMPT_NAME);
        assert!(descriptor.arguments.iter().all(|arg| arg.required));
    }
}
