//! OpenAI-compatible provider implementation
//!
//! Implements [`InferenceProvider`] against the Chat Completions API shape
//! served by OpenAI and by local inference servers (LM Studio, vLLM,
//! llama.cpp). The generation path supports SSE streaming with incremental
//! tool-call assembly; a stream that goes quiet past the stall window is
//! cancellable through the scheduler's stop flag.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::conversation::Usage;
use crate::error::{Result, RoundtableError};

use super::{
    CancelToken, ChatOptions, GenerationOutput, InferenceProvider, PromptMessage, PromptRole,
    TokenSink, ToolDefinition, ToolRequest,
};

// ============================================================================
// Wire Types (request)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// ============================================================================
// Wire Types (response)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: Option<String>,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

// ============================================================================
// Wire Types (stream)
// ============================================================================

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// A tool call assembled incrementally from stream deltas.
#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Merge one batch of tool-call deltas into the accumulator.
fn apply_tool_deltas(partials: &mut Vec<PartialToolCall>, deltas: Vec<DeltaToolCall>) {
    for delta in deltas {
        if partials.len() <= delta.index {
            partials.resize(delta.index + 1, PartialToolCall::default());
        }
        let partial = &mut partials[delta.index];
        if let Some(id) = delta.id {
            partial.id = Some(id);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                partial.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                partial.arguments.push_str(&arguments);
            }
        }
    }
}

/// Parse JSON-encoded arguments, falling back to a marker object so a
/// malformed tool call still surfaces for approval instead of vanishing.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Invalid JSON in tool call arguments");
            serde_json::json!({ "_parse_error": format!("invalid arguments JSON: {}", e) })
        }
    }
}

/// Convert assembled partials into tool requests, dropping nameless stubs.
fn finish_tool_requests(partials: Vec<PartialToolCall>) -> Vec<ToolRequest> {
    partials
        .into_iter()
        .filter(|p| !p.name.is_empty())
        .map(|p| ToolRequest {
            id: p.id,
            function: p.name,
            arguments: parse_arguments(&p.arguments),
        })
        .collect()
}

fn role_str(role: PromptRole) -> &'static str {
    match role {
        PromptRole::System => "system",
        PromptRole::User => "user",
        PromptRole::Assistant => "assistant",
    }
}

fn convert_messages(messages: Vec<PromptMessage>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .map(|m| WireMessage {
            role: role_str(m.role),
            content: m.content,
        })
        .collect()
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Option<Vec<WireTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .into_iter()
            .map(|t| WireTool {
                r#type: "function",
                function: WireFunctionDef {
                    name: t.name,
                    description: t.description,
                    parameters: t.parameters,
                },
            })
            .collect(),
    )
}

// ============================================================================
// Provider
// ============================================================================

/// Provider for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiProvider {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    stall_timeout: Duration,
    client: Client,
}

impl OpenAiProvider {
    /// Create a provider against the given endpoint.
    ///
    /// # Example
    /// ```
    /// use roundtable::providers::{InferenceProvider, OpenAiProvider};
    ///
    /// let provider = OpenAiProvider::new("http://127.0.0.1:1234/v1", "local-model");
    /// assert_eq!(provider.name(), "openai-compat");
    /// ```
    pub fn new(api_base: &str, model: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: None,
            default_model: model.to_string(),
            stall_timeout: Duration::from_secs(120),
            client: Client::new(),
        }
    }

    /// Build a provider from configuration.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut provider = Self::new(&config.api_base, &config.model);
        provider.api_key = config.api_key.clone();
        provider.stall_timeout = Duration::from_secs(config.stall_timeout_secs.max(1));
        provider
    }

    /// Set a bearer token (builder pattern).
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// Override the stall window (builder pattern).
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    fn request_body(
        &self,
        messages: Vec<PromptMessage>,
        tools: Vec<ToolDefinition>,
        options: &ChatOptions,
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: convert_messages(messages),
            tools: convert_tools(tools),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream: stream.then_some(true),
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RoundtableError::Provider(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if let Ok(parsed) = serde_json::from_str::<WireErrorBody>(&body) {
                return Err(RoundtableError::Provider(format!(
                    "endpoint error ({}): {}",
                    status, parsed.error.message
                )));
            }
            return Err(RoundtableError::Provider(format!(
                "endpoint error ({}): {}",
                status, body
            )));
        }

        Ok(response)
    }

    async fn generate_blocking(
        &self,
        messages: Vec<PromptMessage>,
        tools: Vec<ToolDefinition>,
        options: &ChatOptions,
    ) -> Result<GenerationOutput> {
        let request = self.request_body(messages, tools, options, false);
        debug!(model = %request.model, "chat completion request");

        let parsed: ChatResponse = self
            .send(&request)
            .await?
            .json()
            .await
            .map_err(|e| RoundtableError::Provider(format!("malformed response: {}", e)))?;

        let mut output = GenerationOutput::default();
        if let Some(choice) = parsed.choices.into_iter().next() {
            output.text = choice.message.content.unwrap_or_default();
            if let Some(calls) = choice.message.tool_calls {
                output.tool_requests = calls
                    .into_iter()
                    .map(|tc| ToolRequest {
                        id: tc.id,
                        function: tc.function.name,
                        arguments: parse_arguments(&tc.function.arguments),
                    })
                    .collect();
            }
        }
        if let Some(usage) = parsed.usage {
            output.usage = Some(Usage::new(usage.prompt_tokens, usage.completion_tokens));
        }
        Ok(output)
    }

    async fn generate_streaming(
        &self,
        messages: Vec<PromptMessage>,
        tools: Vec<ToolDefinition>,
        options: &ChatOptions,
        tokens: TokenSink,
        cancel: CancelToken,
    ) -> Result<GenerationOutput> {
        let request = self.request_body(messages, tools, options, true);
        debug!(model = %request.model, "streaming chat completion request");

        let response = self.send(&request).await?;
        let mut stream = response.bytes_stream();

        let mut buffer = String::new();
        let mut text = String::new();
        let mut partials: Vec<PartialToolCall> = Vec::new();
        let mut usage = None;
        let mut done = false;

        while !done {
            let chunk = match tokio::time::timeout(self.stall_timeout, stream.next()).await {
                Ok(Some(Ok(bytes))) => bytes,
                Ok(Some(Err(e))) => {
                    return Err(RoundtableError::Provider(format!("stream failed: {}", e)));
                }
                // Some servers close the stream without a [DONE] sentinel.
                Ok(None) => break,
                Err(_) => {
                    if cancel.is_cancelled() {
                        return Err(RoundtableError::Provider(
                            "generation stream stalled and stop was requested".to_string(),
                        ));
                    }
                    debug!("generation stream quiet past stall window, still waiting");
                    continue;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    done = true;
                    break;
                }

                let parsed: StreamChunk = match serde_json::from_str(data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!(error = %e, "skipping unparseable stream line");
                        continue;
                    }
                };

                for choice in parsed.choices {
                    if let Some(fragment) = choice.delta.content {
                        if !fragment.is_empty() {
                            text.push_str(&fragment);
                            // Receiver may be gone after a stop; that is fine.
                            let _ = tokens.send(fragment);
                        }
                    }
                    if let Some(deltas) = choice.delta.tool_calls {
                        apply_tool_deltas(&mut partials, deltas);
                    }
                }
                if let Some(wire_usage) = parsed.usage {
                    usage = Some(Usage::new(
                        wire_usage.prompt_tokens,
                        wire_usage.completion_tokens,
                    ));
                }
            }
        }

        Ok(GenerationOutput {
            text,
            citations: Vec::new(),
            tool_requests: finish_tool_requests(partials),
            usage,
        })
    }
}

#[async_trait]
impl InferenceProvider for OpenAiProvider {
    async fn complete(&self, messages: Vec<PromptMessage>, options: ChatOptions) -> Result<String> {
        let output = self.generate_blocking(messages, Vec::new(), &options).await?;
        Ok(output.text)
    }

    async fn generate(
        &self,
        messages: Vec<PromptMessage>,
        tools: Vec<ToolDefinition>,
        options: ChatOptions,
        tokens: Option<TokenSink>,
        cancel: CancelToken,
    ) -> Result<GenerationOutput> {
        match tokens {
            Some(sink) => {
                self.generate_streaming(messages, tools, &options, sink, cancel)
                    .await
            }
            None => self.generate_blocking(messages, tools, &options).await,
        }
    }

    fn name(&self) -> &str {
        "openai-compat"
    }
}
