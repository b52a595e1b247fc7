//! Extension contracts the runtime consumes.
//!
//! Concrete language-model bridges and tool backends live outside the
//! core; the runtime only depends on these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::ChannelError;
use relay_envelope::{ChannelEvent, ChannelResponse};
use relay_session::{Session, ToolCall};

#[derive(Debug, Clone, PartialEq)]
/// Outcome of a custom message processor. Exhaustive matching at the
/// dispatch site makes a new variant a compile-time obligation.
pub enum ProcessResult {
    /// Reply with this response.
    Respond(ChannelResponse),
    /// Run the named tool, then reply with its formatted result.
    NeedsTool { name: String, arguments: Value },
    /// The processor will answer later through its own path.
    Defer,
    /// No response wanted.
    Ignore,
}

#[async_trait]
/// Caller-supplied per-event processing hook. When configured, it takes
/// precedence over the runtime's mode dispatch.
pub trait MessageProcessor: Send + Sync {
    async fn process(
        &self,
        event: &ChannelEvent,
        session: &Session,
    ) -> Result<ProcessResult, ChannelError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
/// One accumulated round of generation: the text produced so far and any
/// tool calls the model requested before it can continue.
pub struct GenerationChunk {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
/// Bridge to a language-model backend. Called once per generation round;
/// when the previous round requested tools, their results arrive in
/// `tool_results` and the session already carries the tool messages.
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        event: &ChannelEvent,
        session: &Session,
        tool_results: &[ToolExecutionResult],
    ) -> Result<GenerationChunk, ChannelError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecutionResult {
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecutionResult {
    pub fn ok(tool: impl Into<String>, content: Value) -> Self {
        Self {
            tool: tool.into(),
            success: true,
            content: Some(content),
            error: None,
        }
    }

    pub fn failed(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }

    /// Render the result as reply text: the content for successes, the
    /// error for failures.
    pub fn render_text(&self) -> String {
        if self.success {
            match &self.content {
                Some(Value::String(text)) => text.clone(),
                Some(value) => value.to_string(),
                None => "ok".to_string(),
            }
        } else {
            format!(
                "tool '{}' failed: {}",
                self.tool,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ChannelError>;

    async fn execute_tool(
        &self,
        name: &str,
        arguments: &Value,
    ) -> Result<ToolExecutionResult, ChannelError>;
}
