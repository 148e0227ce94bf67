//! The server's table of tools, prompts and the sampling handler.
//!
//! Adding a tool means adding one [`ToolDescriptor`] and one [`ToolHandler`].
//! Descriptors are immutable once registered; the dispatcher consults them
//! to reject unknown argument names and missing required arguments before a
//! handler ever runs, so handlers only see validated arguments.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::mcp::protocol::JsonRpcErrorData;
use crate::mcp::types::{
    CreateMessageParams, CreateMessageResult, GetPromptResult, PromptDescriptor, ToolDescriptor,
};

/// Arguments of a tool or prompt call.
pub type Arguments = Map<String, Value>;

/// Executes one tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with arguments already checked against its descriptor.
    async fn call(&self, arguments: Arguments) -> Result<Value, JsonRpcErrorData>;
}

/// Renders one prompt.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Renders the prompt with arguments already checked against its descriptor.
    async fn render(&self, arguments: Arguments) -> Result<GetPromptResult, JsonRpcErrorData>;
}

/// Produces assistant replies for sampling/createMessage.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    /// Generates a reply for the given history and options.
    async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, JsonRpcErrorData>;
}

/// A tool descriptor and its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    /// What `tools/list` advertises.
    pub descriptor: ToolDescriptor,
    /// What `tools/call` runs.
    pub handler: Arc<dyn ToolHandler>,
}

/// A prompt descriptor and its handler.
#[derive(Clone)]
pub struct RegisteredPrompt {
    /// What `prompts/list` advertises.
    pub descriptor: PromptDescriptor,
    /// What `prompts/get` runs.
    pub handler: Arc<dyn PromptHandler>,
}

/// Tools, prompts and the sampling handler a server exposes.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    tools: Vec<RegisteredTool>,
    prompts: Vec<RegisteredPrompt>,
    sampler: Option<Arc<dyn SamplingHandler>>,
}

impl MethodRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool. A later tool with the same name replaces the earlier one.
    #[must_use]
    pub fn with_tool(mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.retain(|tool| tool.descriptor.name != descriptor.name);
        self.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
        self
    }

    /// Adds a prompt. A later prompt with the same name replaces the earlier one.
    #[must_use]
    pub fn with_prompt(
        mut self,
        descriptor: PromptDescriptor,
        handler: Arc<dyn PromptHandler>,
    ) -> Self {
        self.prompts
            .retain(|prompt| prompt.descriptor.name != descriptor.name);
        self.prompts.push(RegisteredPrompt {
            descriptor,
            handler,
        });
        self
    }

    /// Sets the sampling handler.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn SamplingHandler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Advertised tools, in registration order.
    pub fn tool_descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|tool| &tool.descriptor)
    }

    /// Advertised prompts, in registration order.
    pub fn prompt_descriptors(&self) -> impl Iterator<Item = &PromptDescriptor> {
        self.prompts.iter().map(|prompt| &prompt.descriptor)
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|tool| tool.descriptor.name == name)
    }

    /// Looks up a prompt by name.
    #[must_use]
    pub fn prompt(&self, name: &str) -> Option<&RegisteredPrompt> {
        self.prompts
            .iter()
            .find(|prompt| prompt.descriptor.name == name)
    }

    /// The sampling handler, if any.
    #[must_use]
    pub fn sampler(&self) -> Option<&Arc<dyn SamplingHandler>> {
        self.sampler.as_ref()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field(
                "tools",
                &self.tool_descriptors().map(|t| &t.name).collect::<Vec<_>>(),
            )
            .field(
                "prompts",
                &self.prompt_descriptors().map(|p| &p.name).collect::<Vec<_>>(),
            )
            .field("sampler", &self.sampler.is_some())
            .finish()
    }
}
