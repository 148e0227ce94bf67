//! Static dispatch table and method routing.
//!
//! [`Method`] is the table of every method name the server recognises.
//! [`Dispatcher`] turns a method plus its raw params into a result object or
//! an error descriptor; it knows nothing about ids, sessions or sockets.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::mcp::protocol::{ErrorCode, JsonRpcErrorData, MCP_PROTOCOL_VERSION};
use crate::mcp::registry::MethodRegistry;
use crate::mcp::types::{
    check_arguments, CreateMessageParams, GetPromptParams, Implementation, InitializeParams,
    InitializeResult, ListChanged, PromptsListResult, ServerCapabilities, ToolCallParams,
    ToolsListResult,
};

/// Every method the server recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `initialize` request.
    Initialize,
    /// `initialized` notification (also `notifications/initialized`).
    Initialized,
    /// `ping` request.
    Ping,
    /// `tools/list` request.
    ToolsList,
    /// `tools/call` request.
    ToolsCall,
    /// `prompts/list` request.
    PromptsList,
    /// `prompts/get` request.
    PromptsGet,
    /// `sampling/createMessage` request.
    CreateMessage,
}

impl Method {
    /// Looks a method up by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "initialize" => Self::Initialize,
            "initialized" | "notifications/initialized" => Self::Initialized,
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "prompts/list" => Self::PromptsList,
            "prompts/get" => Self::PromptsGet,
            "sampling/createMessage" => Self::CreateMessage,
            _ => return None,
        };
        Some(method)
    }

    /// The canonical wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "initialized",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::PromptsList => "prompts/list",
            Self::PromptsGet => "prompts/get",
            Self::CreateMessage => "sampling/createMessage",
        }
    }

    /// Whether the method is only valid as a notification.
    #[must_use]
    pub const fn is_notification(self) -> bool {
        matches!(self, Self::Initialized)
    }

    /// Whether the method is allowed before the handshake completes.
    #[must_use]
    pub const fn allowed_before_init(self) -> bool {
        matches!(self, Self::Initialize | Self::Initialized | Self::Ping)
    }
}

/// Routes methods to the registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<MethodRegistry>) -> Self {
        Self { registry }
    }

    /// Runs `method` with `params`.
    ///
    /// # Errors
    ///
    /// Returns the error descriptor to send back to the peer.
    pub async fn dispatch(
        &self,
        method: Method,
        params: Option<Value>,
    ) -> Result<Value, JsonRpcErrorData> {
        match method {
            Method::Initialize => self.initialize(params),
            Method::Initialized => Ok(Value::Null),
            Method::Ping => Ok(json!({})),
            Method::ToolsList => self.list_tools(),
            Method::ToolsCall => self.call_tool(params).await,
            Method::PromptsList => self.list_prompts(),
            Method::PromptsGet => self.get_prompt(params).await,
            Method::CreateMessage => self.create_message(params).await,
        }
    }

    /// Validates the protocol version and builds the initialize result.
    ///
    /// # Errors
    ///
    /// Returns -32602 for missing or malformed params and -32600 when the
    /// protocol version does not match exactly.
    pub fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        let params: InitializeParams = parse_params(params, "initialize")?;

        if params.protocol_version != MCP_PROTOCOL_VERSION {
            return Err(JsonRpcErrorData::with_message(
                ErrorCode::InvalidRequest,
                format!(
                    "Unsupported protocol version: {} (expected {MCP_PROTOCOL_VERSION})",
                    params.protocol_version
                ),
            ));
        }

        if let Some(client) = &params.client_info {
            tracing::info!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                "Client initialising"
            );
        }

        let capabilities = ServerCapabilities {
            tools: Some(ListChanged::default()),
            prompts: Some(ListChanged::default()),
            sampling: self.registry.sampler().map(|_| json!({})),
        };

        to_result(&InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities,
            server_info: Implementation::server(),
        })
    }

    fn list_tools(&self) -> Result<Value, JsonRpcErrorData> {
        to_result(&ToolsListResult {
            tools: self.registry.tool_descriptors().cloned().collect(),
            next_cursor: None,
        })
    }

    fn list_prompts(&self) -> Result<Value, JsonRpcErrorData> {
        to_result(&PromptsListResult {
            prompts: self.registry.prompt_descriptors().cloned().collect(),
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        let params: ToolCallParams = parse_params(params, "tool call")?;

        let tool = self.registry.tool(&params.name).ok_or_else(|| {
            JsonRpcErrorData::method_not_found(format!("Unknown tool: {}", params.name))
        })?;

        let arguments = params.arguments.unwrap_or_default();
        if let Some(problem) = check_arguments(&tool.descriptor.arguments, &arguments) {
            return Err(JsonRpcErrorData::invalid_params(format!(
                "Invalid params for tool {}: {problem}",
                params.name
            )));
        }

        let started = Instant::now();
        let result = tool.handler.call(arguments).await;
        tracing::info!(
            tool = %params.name,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "Tool call finished"
        );
        result
    }

    async fn get_prompt(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        let params: GetPromptParams = parse_params(params, "prompt")?;

        let prompt = self.registry.prompt(&params.name).ok_or_else(|| {
            JsonRpcErrorData::method_not_found(format!("Unknown prompt: {}", params.name))
        })?;

        let arguments = params.arguments.unwrap_or_default();
        if let Some(problem) = check_arguments(&prompt.descriptor.arguments, &arguments) {
            return Err(JsonRpcErrorData::invalid_params(format!(
                "Invalid params for prompt {}: {problem}",
                params.name
            )));
        }

        let rendered = prompt.handler.render(arguments).await?;
        to_result(&rendered)
    }

    async fn create_message(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorData> {
        let sampler = self
            .registry
            .sampler()
            .ok_or_else(|| JsonRpcErrorData::method_not_found("Sampling is not supported"))?;

        let params: CreateMessageParams = parse_params(params, "createMessage")?;
        if params.messages.is_empty() {
            return Err(JsonRpcErrorData::invalid_params(
                "Invalid params: messages must not be empty",
            ));
        }

        let reply = sampler.create_message(params).await?;
        to_result(&reply)
    }
}

fn parse_params<T: DeserializeOwned>(
    params: Option<Value>,
    what: &str,
) -> Result<T, JsonRpcErrorData> {
    let value = params
        .ok_or_else(|| JsonRpcErrorData::invalid_params(format!("Missing {what} params")))?;
    serde_json::from_value(value)
        .map_err(|e| JsonRpcErrorData::invalid_params(format!("Invalid {what} params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcErrorData> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise result");
        JsonRpcErrorData::internal("Internal error: failed to serialise result")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::registry::{Arguments, PromptHandler, SamplingHandler, ToolHandler};
    use crate::mcp::types::{
        ArgumentDescriptor, Content, CreateMessageResult, GetPromptResult, Message,
        PromptDescriptor, Role, ToolDescriptor,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolHandler for CountingTool {
        async fn call(&self, arguments: Arguments) -> Result<Value, JsonRpcErrorData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "symbol": arguments["symbol"] }))
        }
    }

    struct Greeting;

    #[async_trait]
    impl PromptHandler for Greeting {
        async fn render(&self, arguments: Arguments) -> Result<GetPromptResult, JsonRpcErrorData> {
            Ok(GetPromptResult {
                description: "greeting".to_string(),
                messages: vec![Message::user(format!("hello {}", arguments["who"]))],
            })
        }
    }

    struct Parrot;

    #[async_trait]
    impl SamplingHandler for Parrot {
        async fn create_message(
            &self,
            params: CreateMessageParams,
        ) -> Result<CreateMessageResult, JsonRpcErrorData> {
            Ok(CreateMessageResult {
                role: Role::Assistant,
                content: params.messages[0].content.clone(),
                model: "parrot".to_string(),
                stop_reason: "endTurn".to_string(),
            })
        }
    }

    fn dispatcher(tool: Arc<CountingTool>) -> Dispatcher {
        let registry = MethodRegistry::new()
            .with_tool(
                ToolDescriptor::new(
                    "get_coin_price",
                    "price",
                    vec![ArgumentDescriptor::required("symbol", "ticker")],
                ),
                tool,
            )
            .with_prompt(
                PromptDescriptor::new(
                    "greet",
                    "greeting",
                    vec![ArgumentDescriptor::required("who", "name")],
                ),
                Arc::new(Greeting),
            )
            .with_sampler(Arc::new(Parrot));
        Dispatcher::new(Arc::new(registry))
    }

    #[test]
    fn method_table_recognises_every_method() {
        for name in [
            "initialize",
            "initialized",
            "ping",
            "tools/list",
            "tools/call",
            "prompts/list",
            "prompts/get",
            "sampling/createMessage",
        ] {
            assert_eq!(Method::from_name(name).map(Method::name), Some(name));
        }
        assert_eq!(
            Method::from_name("notifications/initialized"),
            Some(Method::Initialized)
        );
        assert_eq!(Method::from_name("resources/list"), None);
        assert!(Method::Initialized.is_notification());
        assert!(!Method::ToolsCall.allowed_before_init());
    }

    #[test]
    fn initialize_accepts_matching_version() {
        let d = dispatcher(Arc::default());
        let result = d
            .initialize(Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0.0"}
            })))
            .unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "binance-mcp");
        assert_eq!(result["capabilities"]["sampling"], json!({}));
    }

    #[test]
    fn initialize_rejects_other_versions() {
        let d = dispatcher(Arc::default());
        let err = d
            .initialize(Some(json!({"protocolVersion": "2023-01-01"})))
            .unwrap_err();
        assert_eq!(err.code, -32600);
        assert!(err.message.contains("Unsupported protocol version"));

        let err = d.initialize(None).unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn tools_list_returns_registry() {
        let d = dispatcher(Arc::default());
        let result = d.dispatch(Method::ToolsList, None).await.unwrap();
        assert_eq!(result["tools"][0]["name"], "get_coin_price");
        assert_eq!(result["tools"][0]["arguments"][0]["required"], true);
        assert_eq!(result["nextCursor"], Value::Null);
    }

    #[tokio::test]
    async fn missing_required_argument_never_reaches_handler() {
        let tool = Arc::new(CountingTool::default());
        let d = dispatcher(Arc::clone(&tool));

        let err = d
            .dispatch(
                Method::ToolsCall,
                Some(json!({"name": "get_coin_price", "arguments": {}})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
        assert!(err.message.contains("symbol"));

        let err = d
            .dispatch(Method::ToolsCall, Some(json!({"name": "get_coin_price"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_call_reaches_handler() {
        let tool = Arc::new(CountingTool::default());
        let d = dispatcher(Arc::clone(&tool));

        let result = d
            .dispatch(
                Method::ToolsCall,
                Some(json!({"name": "get_coin_price", "arguments": {"symbol": "BTC"}})),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"symbol": "BTC"}));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_and_unknown_argument() {
        let d = dispatcher(Arc::default());

        let err = d
            .dispatch(Method::ToolsCall, Some(json!({"name": "nope", "arguments": {}})))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32601);

        let err = d
            .dispatch(
                Method::ToolsCall,
                Some(json!({"name": "get_coin_price", "arguments": {"symbol": "BTC", "x": 1}})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
        assert!(err.message.contains("Unknown argument: x"));

        let err = d
            .dispatch(
                Method::ToolsCall,
                Some(json!({"name": "get_coin_price", "arguments": "BTC"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn prompts_are_listed_and_rendered() {
        let d = dispatcher(Arc::default());

        let list = d.dispatch(Method::PromptsList, None).await.unwrap();
        assert_eq!(list["prompts"][0]["name"], "greet");

        let rendered = d
            .dispatch(
                Method::PromptsGet,
                Some(json!({"name": "greet", "arguments": {"who": "Ada"}})),
            )
            .await
            .unwrap();
        assert_eq!(rendered["messages"][0]["role"], "user");
        assert_eq!(rendered["messages"][0]["content"]["text"], r#"hello "Ada""#);

        let err = d
            .dispatch(Method::PromptsGet, Some(json!({"name": "greet"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);

        let err = d
            .dispatch(Method::PromptsGet, Some(json!({"name": "missing"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[tokio::test]
    async fn create_message_requires_messages() {
        let d = dispatcher(Arc::default());

        let reply = d
            .dispatch(
                Method::CreateMessage,
                Some(json!({
                    "messages": [{"role": "user", "content": {"type": "text", "text": "hi"}}],
                    "maxTokens": 10
                })),
            )
            .await
            .unwrap();
        assert_eq!(reply["role"], "assistant");
        assert_eq!(reply["stopReason"], "endTurn");
        assert_eq!(
            serde_json::from_value::<Content>(reply["content"].clone()).unwrap(),
            Content::text("hi")
        );

        let err = d
            .dispatch(Method::CreateMessage, Some(json!({"messages": []})))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn create_message_without_sampler() {
        let d = Dispatcher::new(Arc::new(MethodRegistry::new()));
        let err = d
            .dispatch(Method::CreateMessage, Some(json!({"messages": []})))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32601);
    }
}
