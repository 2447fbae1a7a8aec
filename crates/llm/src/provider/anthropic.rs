//! Anthropic messages API adapter.
//!
//! The messages API differs from the OpenAI shape in three ways that matter
//! here: the system prompt is a dedicated field, tool results travel as
//! user-role content blocks, and the stream is a typed event sequence
//! (`message_start` … `content_block_delta` … `message_stop`) rather than
//! bare deltas. This adapter folds all of that back into the unified chunk
//! contract.

use std::collections::HashMap;

use async_trait::async_trait;
use catalog::ProviderKind;
use config::ProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{
    Chunk, ChunkStream, ExecuteContext, FinishReason, ProviderError, ProviderErrorKind, ProviderRequest,
    ToolCallDelta, Usage,
    admission::Gate,
    http_client::http_client,
    messages::{ChatMessage, Role, ToolDefinition},
    provider::{Provider, check_max_tokens, retry_after},
};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The messages API requires `max_tokens`; this stands in when the caller
/// did not set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub(crate) struct AnthropicProvider {
    client: Client,
    base_url: String,
    name: String,
    api_key: SecretString,
    gate: Gate,
}

impl AnthropicProvider {
    pub fn new(name: String, config: &ProviderConfig, pool_size: usize, admission_wait: std::time::Duration) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string());

        Self {
            client: http_client(pool_size),
            base_url,
            gate: Gate::new(name.clone(), pool_size, admission_wait),
            name,
            api_key: config.api_key.clone(),
        }
    }

    fn api_key<'a>(&'a self, ctx: &'a ExecuteContext) -> &'a SecretString {
        ctx.api_key_override.as_ref().unwrap_or(&self.api_key)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn execute(&self, request: ProviderRequest, ctx: &ExecuteContext) -> Result<ChunkStream, ProviderError> {
        check_max_tokens(&self.name, &request)?;

        let permit = self.gate.admit().await?;
        let url = format!("{}/v1/messages", self.base_url);
        let streaming = request.stream;
        let wire_request = WireRequest::from(&request);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::BadRequest,
                &self.name,
                format!("failed to serialize request: {e}"),
            )
        })?;

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key(ctx).expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ProviderErrorKind::Timeout
                } else {
                    ProviderErrorKind::Network
                };
                ProviderError::new(kind, &self.name, format!("request failed: {e}"))
            })?;

        let status = response.status();

        if !status.is_success() {
            let hint = retry_after(response.headers());
            let error_text = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            log::debug!("Anthropic API error ({status}): {error_text}");

            return Err(ProviderError::from_status(&self.name, status.as_u16(), error_text, hint));
        }

        if streaming {
            let provider = self.name.clone();
            let mut state = StreamState::default();

            let chunk_stream = response
                .bytes_stream()
                .eventsource()
                .map(move |event| {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            return vec![Err(ProviderError::new(
                                ProviderErrorKind::Network,
                                provider.clone(),
                                format!("stream decode error: {e}"),
                            ))];
                        }
                    };

                    match sonic_rs::from_str::<WireStreamEvent>(&event.data) {
                        Ok(parsed) => state.translate(parsed, &provider).into_iter().map(Ok).collect(),
                        Err(_) => {
                            log::warn!("failed to parse Anthropic stream event '{}'", event.event);
                            Vec::new()
                        }
                    }
                })
                .flat_map(futures::stream::iter);

            Ok(Gate::hold(Box::pin(chunk_stream), permit))
        } else {
            let text = response.text().await.map_err(|e| {
                ProviderError::new(
                    ProviderErrorKind::Network,
                    &self.name,
                    format!("failed to read response body: {e}"),
                )
            })?;

            let wire: WireResponse = sonic_rs::from_str(&text).map_err(|e| {
                ProviderError::new(
                    ProviderErrorKind::Internal,
                    &self.name,
                    format!("failed to parse messages response: {e}"),
                )
            })?;

            let chunks: Vec<Result<Chunk, ProviderError>> = wire.into_chunks().into_iter().map(Ok).collect();
            Ok(Gate::hold(Box::pin(futures::stream::iter(chunks)), permit))
        }
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl From<&ProviderRequest> for WireRequest {
    fn from(request: &ProviderRequest) -> Self {
        // System turns move to the dedicated field, concatenated in order.
        let system: Vec<&ChatMessage> = request.messages.iter().filter(|m| m.role == Role::System).collect();
        let system = if system.is_empty() {
            None
        } else {
            Some(
                system
                    .iter()
                    .map(|m| m.text_content())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            )
        };

        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(WireMessage::from)
            .collect();

        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.iter().map(WireTool::from).collect())
            },
            stream: request.stream,
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        match message.role {
            // Tool results are user-role tool_result blocks on this API.
            Role::Tool => WireMessage {
                role: "user",
                content: vec![WireContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.text_content(),
                }],
            },
            Role::Assistant => {
                let mut content = Vec::new();
                let text = message.text_content();
                if !text.is_empty() {
                    content.push(WireContentBlock::Text { text });
                }
                for call in &message.tool_calls {
                    content.push(WireContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null),
                    });
                }
                WireMessage {
                    role: "assistant",
                    content,
                }
            }
            _ => WireMessage {
                role: "user",
                content: vec![WireContentBlock::Text {
                    text: message.text_content(),
                }],
            },
        }
    }
}

impl From<&ToolDefinition> for WireTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.parameters.clone(),
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<WireResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Default, Clone, Copy)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl WireResponse {
    fn into_chunks(self) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut tool_index = 0;

        for block in self.content {
            match block {
                WireResponseBlock::Text { text } => {
                    if !text.is_empty() {
                        chunks.push(Chunk::TextDelta(text));
                    }
                }
                WireResponseBlock::ToolUse { id, name, input } => {
                    chunks.push(Chunk::ToolCallDelta(ToolCallDelta {
                        index: tool_index,
                        id: Some(id),
                        name: Some(name),
                        arguments: input.to_string(),
                    }));
                    tool_index += 1;
                }
                WireResponseBlock::Unknown => {}
            }
        }

        if let Some(usage) = self.usage {
            chunks.push(Chunk::Usage(Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                reasoning_tokens: None,
            }));
        }

        chunks.push(Chunk::Finish(parse_stop_reason(self.stop_reason.as_deref())));
        chunks
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireStreamEvent {
    MessageStart {
        message: WireStreamMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: WireStreamBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireStreamDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        delta: WireMessageDelta,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: WireStreamError,
    },
}

#[derive(Deserialize)]
struct WireStreamMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireStreamBlock {
    Text {
        #[allow(dead_code)]
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireStreamDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireStreamError {
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    message: String,
}

/// Per-stream translation state: input tokens arrive in `message_start`,
/// output tokens and the stop reason in `message_delta`, and tool-use blocks
/// are numbered by their first appearance.
#[derive(Default)]
struct StreamState {
    input_tokens: u64,
    /// Maps the event `index` of a tool_use content block to its position
    /// among tool calls.
    tool_indices: HashMap<usize, usize>,
    stop_reason: Option<String>,
}

impl StreamState {
    fn translate(&mut self, event: WireStreamEvent, provider: &str) -> Vec<Chunk> {
        match event {
            WireStreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.map(|u| u.input_tokens).unwrap_or_default();
                Vec::new()
            }
            WireStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                WireStreamBlock::ToolUse { id, name } => {
                    let tool_index = self.tool_indices.len();
                    self.tool_indices.insert(index, tool_index);

                    vec![Chunk::ToolCallDelta(ToolCallDelta {
                        index: tool_index,
                        id: Some(id),
                        name: Some(name),
                        arguments: String::new(),
                    })]
                }
                WireStreamBlock::Text { .. } | WireStreamBlock::Unknown => Vec::new(),
            },
            WireStreamEvent::ContentBlockDelta { index, delta } => match delta {
                WireStreamDelta::TextDelta { text } => vec![Chunk::TextDelta(text)],
                WireStreamDelta::InputJsonDelta { partial_json } => {
                    let tool_index = self.tool_indices.get(&index).copied().unwrap_or_default();
                    vec![Chunk::ToolCallDelta(ToolCallDelta {
                        index: tool_index,
                        id: None,
                        name: None,
                        arguments: partial_json,
                    })]
                }
                WireStreamDelta::Unknown => Vec::new(),
            },
            WireStreamEvent::ContentBlockStop { .. } | WireStreamEvent::Ping => Vec::new(),
            WireStreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;

                usage
                    .map(|u| {
                        vec![Chunk::Usage(Usage {
                            input_tokens: self.input_tokens,
                            output_tokens: u.output_tokens,
                            reasoning_tokens: None,
                        })]
                    })
                    .unwrap_or_default()
            }
            WireStreamEvent::MessageStop => {
                vec![Chunk::Finish(parse_stop_reason(self.stop_reason.as_deref()))]
            }
            WireStreamEvent::Error { error } => {
                log::warn!("Anthropic stream error from {provider}: {} {}", error.r#type, error.message);
                vec![Chunk::Finish(FinishReason::Stop)]
            }
        }
    }
}

fn parse_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}
