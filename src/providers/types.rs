//! Provider types for Roundtable
//!
//! This module defines the [`InferenceProvider`] trait and the common types
//! for talking to an inference endpoint: prompt messages, chat options, tool
//! definitions, and the structured generation output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::conversation::{Citation, ToolInvocation, Usage};
use crate::error::Result;

/// Role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    /// System / behavioral instructions.
    System,
    /// Human or driver input.
    User,
    /// Model output (prior agent turns).
    Assistant,
}

/// A single message in a provider request.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    /// The message role.
    pub role: PromptRole,
    /// The text content.
    pub content: String,
}

impl PromptMessage {
    /// Create a system message.
    pub fn system(content: &str) -> Self {
        Self {
            role: PromptRole::System,
            content: content.to_string(),
        }
    }

    /// Create a user message.
    pub fn user(content: &str) -> Self {
        Self {
            role: PromptRole::User,
            content: content.to_string(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: &str) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.to_string(),
        }
    }
}

/// Options for a provider call.
///
/// Use the builder pattern to construct options.
///
/// # Example
/// ```
/// use roundtable::providers::ChatOptions;
///
/// let options = ChatOptions::new().with_max_tokens(16).with_temperature(0.0);
/// assert_eq!(options.max_tokens, Some(16));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Model override; falls back to the provider default.
    pub model: Option<String>,
    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 = near-deterministic).
    pub temperature: Option<f32>,
}

impl ChatOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model (builder pattern).
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    /// Set the output token budget (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature (builder pattern).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Definition of a tool the model may request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// A tool request extracted from a generated turn.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    /// Provider-assigned call id, if any.
    pub id: Option<String>,
    /// Requested function name.
    pub function: String,
    /// Parsed JSON arguments.
    pub arguments: serde_json::Value,
}

impl ToolRequest {
    /// Convert into a pending conversation invocation, keeping the
    /// provider-assigned id when present.
    pub fn into_invocation(self) -> ToolInvocation {
        match self.id {
            Some(id) => ToolInvocation::with_id(&id, &self.function, self.arguments),
            None => ToolInvocation::new(&self.function, self.arguments),
        }
    }
}

/// Structured result of a generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    /// Full generated text.
    pub text: String,
    /// Source citations, when the provider surfaces them.
    pub citations: Vec<Citation>,
    /// Tool requests embedded in the turn.
    pub tool_requests: Vec<ToolRequest>,
    /// Token usage, when reported.
    pub usage: Option<Usage>,
}

impl GenerationOutput {
    /// Returns true if the turn requested any tools.
    pub fn has_tool_requests(&self) -> bool {
        !self.tool_requests.is_empty()
    }
}

/// Sink for streamed tokens. Unbounded so the producer never blocks.
pub type TokenSink = mpsc::UnboundedSender<String>;

/// Cooperative cancellation handle tied to the scheduler's stop flag.
///
/// Providers consult this only when a stream has gone quiet past the stall
/// window; a healthy in-flight generation always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Build a token from the scheduler's stop channel.
    pub fn from_watch(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A token that never cancels (tests, one-shot calls).
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Returns true once a stop has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Trait for inference endpoints.
///
/// `complete` is the lightweight path used by the speaker selector: small
/// output budget, no tools, no streaming. `generate` is the full path used
/// for agent turns: tool definitions, optional token streaming, and
/// stall-aware cancellation.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// One-shot completion returning the reply text.
    async fn complete(&self, messages: Vec<PromptMessage>, options: ChatOptions) -> Result<String>;

    /// Full generation for an agent turn.
    ///
    /// When `tokens` is provided, implementations stream each text fragment
    /// into it as it arrives; the sink is unbounded and must never be
    /// awaited on.
    async fn generate(
        &self,
        messages: Vec<PromptMessage>,
        tools: Vec<ToolDefinition>,
        options: ChatOptions,
        tokens: Option<TokenSink>,
        cancel: CancelToken,
    ) -> Result<GenerationOutput>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_message_constructors() {
        assert_eq!(PromptMessage::system("s").role, PromptRole::System);
        assert_eq!(PromptMessage::user("u").role, PromptRole::User);
        assert_eq!(PromptMessage::assistant("a").role, PromptRole::Assistant);
    }

    #[test]
    fn test_chat_options_builder() {
        let options = ChatOptions::new()
            .with_model("mini")
            .with_max_tokens(128)
            .with_temperature(0.2);
        assert_eq!(options.model.as_deref(), Some("mini"));
        assert_eq!(options.max_tokens, Some(128));
        assert_eq!(options.temperature, Some(0.2));
    }

    #[test]
    fn test_chat_options_default() {
        let options = ChatOptions::default();
        assert!(options.model.is_none());
        assert!(options.max_tokens.is_none());
        assert!(options.temperature.is_none());
    }

    #[test]
    fn test_tool_request_into_invocation_keeps_id() {
        let request = ToolRequest {
            id: Some("call_3".to_string()),
            function: "write_file".to_string(),
            arguments: json!({"filename": "a.txt"}),
        };
        let invocation = request.into_invocation();
        assert_eq!(invocation.id, "call_3");
        assert_eq!(invocation.function, "write_file");
    }

    #[test]
    fn test_tool_request_into_invocation_generates_id() {
        let request = ToolRequest {
            id: None,
            function: "write_file".to_string(),
            arguments: json!({}),
        };
        let invocation = request.into_invocation();
        assert!(!invocation.id.is_empty());
    }

    #[test]
    fn test_generation_output_has_tool_requests() {
        let mut output = GenerationOutput {
            text: "done".to_string(),
            ..Default::default()
        };
        assert!(!output.has_tool_requests());

        output.tool_requests.push(ToolRequest {
            id: None,
            function: "write_file".to_string(),
            arguments: json!({}),
        });
        assert!(output.has_tool_requests());
    }

    #[test]
    fn test_cancel_token_never() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_token_from_watch() {
        let (tx, rx) = watch::channel(false);
        let token = CancelToken::from_watch(rx);
        assert!(!token.is_cancelled());

        tx.send(true).unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_tool_definition_serde() {
        let def = ToolDefinition::new(
            "write_file",
            "Write a file into the workspace",
            json!({"type": "object"}),
        );
        let json_str = serde_json::to_string(&def).unwrap();
        let restored: ToolDefinition = serde_json::from_str(&json_str).unwrap();
        assert_eq!(restored.name, "write_file");
    }
}
