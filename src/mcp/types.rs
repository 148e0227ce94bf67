//! Typed payloads for the recognised MCP methods.
//!
//! These structures map directly onto the `params` and `result` objects of
//! `initialize`, `tools/*`, `prompts/*` and `sampling/createMessage`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::mcp::protocol::{CLIENT_NAME, MCP_PROTOCOL_VERSION, SERVER_NAME};

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool, so we must take &bool here
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Name and version of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Peer name.
    pub name: String,
    /// Peer version.
    #[serde(default)]
    pub version: Option<String>,
}

impl Implementation {
    /// Identity advertised by this crate's server.
    #[must_use]
    pub fn server() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    /// Identity advertised by this crate's client.
    #[must_use]
    pub fn client() -> Self {
        Self {
            name: CLIENT_NAME.to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

/// Capabilities declared by the client during initialisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Root listing support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<ListChanged>,
    /// Sampling support (empty object when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

impl ClientCapabilities {
    /// Capabilities this crate's client declares.
    #[must_use]
    pub fn host() -> Self {
        Self {
            roots: Some(ListChanged { list_changed: true }),
            sampling: Some(json!({})),
        }
    }
}

/// A `listChanged` capability flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChanged {
    /// Whether the list can change during the session.
    #[serde(default, skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

/// Capabilities advertised by the server during initialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChanged>,
    /// Prompt-related capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChanged>,
    /// Sampling support (empty object when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ListChanged::default()),
            prompts: Some(ListChanged::default()),
            sampling: Some(json!({})),
        }
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<Implementation>,
}

impl InitializeParams {
    /// Parameters this crate's client sends.
    #[must_use]
    pub fn host() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::host(),
            client_info: Some(Implementation::client()),
        }
    }
}

/// Result of a successful initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server speaks.
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server information.
    pub server_info: Implementation,
}

/// One named argument of a tool or prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    /// Argument name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether the argument must be supplied.
    #[serde(default)]
    pub required: bool,
}

impl ArgumentDescriptor {
    /// A required argument.
    #[must_use]
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    /// An optional argument.
    #[must_use]
    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// Checks call arguments against a declared argument list.
///
/// Returns a description of the first problem: an unrecognised argument name
/// or a required argument that is absent, `null` or an empty string.
#[must_use]
pub fn check_arguments(declared: &[ArgumentDescriptor], given: &Map<String, Value>) -> Option<String> {
    if let Some(unknown) = given
        .keys()
        .find(|name| !declared.iter().any(|arg| &arg.name == *name))
    {
        return Some(format!("Unknown argument: {unknown}"));
    }

    declared
        .iter()
        .filter(|arg| arg.required)
        .find(|arg| match given.get(&arg.name) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .map(|arg| format!("Missing required argument: {}", arg.name))
}

/// A tool definition for the tools/list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Declared arguments.
    #[serde(default)]
    pub arguments: Vec<ArgumentDescriptor>,
    /// JSON Schema for the tool's input, derived from `arguments`.
    #[serde(default)]
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Creates a descriptor and derives its input schema.
    #[must_use]
    pub fn new(name: &str, description: &str, arguments: Vec<ArgumentDescriptor>) -> Self {
        let properties: Map<String, Value> = arguments
            .iter()
            .map(|arg| {
                (
                    arg.name.clone(),
                    json!({ "type": "string", "description": arg.description }),
                )
            })
            .collect();
        let required: Vec<&str> = arguments
            .iter()
            .filter(|arg| arg.required)
            .map(|arg| arg.name.as_str())
            .collect();

        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
            arguments,
        }
    }
}

/// A prompt definition for the prompts/list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Declared arguments.
    #[serde(default)]
    pub arguments: Vec<ArgumentDescriptor>,
}

impl PromptDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(name: &str, description: &str, arguments: Vec<ArgumentDescriptor>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            arguments,
        }
    }
}

/// Result of tools/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    /// Every tool the server offers.
    pub tools: Vec<ToolDescriptor>,
    /// Pagination cursor; always `null` here.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Result of prompts/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsListResult {
    /// Every prompt the server offers.
    pub prompts: Vec<PromptDescriptor>,
    /// Pagination cursor; always `null` here.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Parameters for tools/call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Parameters for prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    /// Name of the prompt.
    pub name: String,
    /// Arguments for the prompt template.
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The model side of the conversation.
    Assistant,
}

/// Content of a prompt or sampling message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

impl Content {
    /// Creates text content.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the text, if this is text content.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
        }
    }
}

/// A single message in a prompt or a sampling history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// What the message says.
    pub content: Content,
}

impl Message {
    /// A user-authored text message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::text(text),
        }
    }
}

/// Result of prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Description of the rendered prompt.
    #[serde(default)]
    pub description: String,
    /// The rendered messages.
    pub messages: Vec<Message>,
}

/// A model name hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHint {
    /// Suggested model name.
    pub name: String,
}

/// Model selection preferences for sampling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPreferences {
    /// Ordered model hints; the first wins.
    #[serde(default)]
    pub hints: Vec<ModelHint>,
    /// Relative weight of intelligence, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intelligence_priority: Option<f64>,
}

/// Options for sampling/createMessage besides the message history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageOptions {
    /// System prompt carrying the context for the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Model preferences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_preferences: Option<ModelPreferences>,
    /// Upper bound on the reply length, in words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Parameters for sampling/createMessage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageParams {
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// Everything else.
    #[serde(flatten)]
    pub options: CreateMessageOptions,
}

/// Result of sampling/createMessage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    /// Always `assistant`.
    pub role: Role,
    /// The generated reply.
    pub content: Content,
    /// Model that produced the reply.
    pub model: String,
    /// Why generation stopped (`endTurn`, `maxTokens`).
    pub stop_reason: String,
}
