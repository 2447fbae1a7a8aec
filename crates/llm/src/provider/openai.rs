//! OpenAI-compatible chat completions adapter.

use async_trait::async_trait;
use catalog::ProviderKind;
use config::ProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{
    Chunk, ChunkStream, ExecuteContext, FinishReason, ProviderError, ProviderErrorKind, ProviderRequest,
    ToolCallDelta, Usage,
    admission::Gate,
    http_client::http_client,
    messages::{ChatMessage, MessageContent, Role, ToolCall, ToolDefinition},
    provider::{Provider, check_max_tokens, retry_after},
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

pub(crate) struct OpenAiProvider {
    client: Client,
    base_url: String,
    name: String,
    api_key: SecretString,
    gate: Gate,
}

impl OpenAiProvider {
    pub fn new(name: String, config: &ProviderConfig, pool_size: usize, admission_wait: std::time::Duration) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string());

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
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn execute(&self, request: ProviderRequest, ctx: &ExecuteContext) -> Result<ChunkStream, ProviderError> {
        check_max_tokens(&self.name, &request)?;

        let permit = self.gate.admit().await?;
        let url = format!("{}/chat/completions", self.base_url);
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
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key(ctx).expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| connection_error(&self.name, e))?;

        let status = response.status();

        if !status.is_success() {
            let hint = retry_after(response.headers());
            let error_text = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            log::debug!("OpenAI API error ({status}): {error_text}");

            return Err(ProviderError::from_status(&self.name, status.as_u16(), error_text, hint));
        }

        if streaming {
            let provider = self.name.clone();
            let chunk_stream = response
                .bytes_stream()
                .eventsource()
                .filter_map(move |event| {
                    let provider = provider.clone();
                    async move {
                        let event = match event {
                            Ok(event) => event,
                            Err(e) => {
                                log::warn!("SSE decode error in OpenAI stream: {e}");
                                return Some(Err(ProviderError::new(
                                    ProviderErrorKind::Network,
                                    provider,
                                    format!("stream decode error: {e}"),
                                )));
                            }
                        };

                        if event.data == "[DONE]" {
                            return None;
                        }

                        match sonic_rs::from_str::<WireStreamChunk>(&event.data) {
                            Ok(chunk) => Some(Ok(chunk)),
                            Err(_) => {
                                // Frames that fail to parse are dropped, not fatal.
                                log::warn!("failed to parse OpenAI streaming chunk");
                                None
                            }
                        }
                    }
                })
                .flat_map(|result| {
                    futures::stream::iter(match result {
                        Ok(chunk) => chunk.into_chunks().into_iter().map(Ok).collect::<Vec<_>>(),
                        Err(e) => vec![Err(e)],
                    })
                });

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
                log::debug!("unparseable OpenAI response ({} bytes)", text.len());
                ProviderError::new(
                    ProviderErrorKind::Internal,
                    &self.name,
                    format!("failed to parse chat completion response: {e}"),
                )
            })?;

            let chunks: Vec<Result<Chunk, ProviderError>> = wire.into_chunks().into_iter().map(Ok).collect();
            Ok(Gate::hold(Box::pin(futures::stream::iter(chunks)), permit))
        }
    }
}

fn connection_error(provider: &str, error: reqwest::Error) -> ProviderError {
    let kind = if error.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Network
    };

    ProviderError::new(kind, provider, format!("request failed: {error}"))
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<WireStreamOptions>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    r#type: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct WireResponseFormat {
    r#type: &'static str,
    json_schema: WireJsonSchema,
}

#[derive(Serialize)]
struct WireJsonSchema {
    name: &'static str,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Serialize)]
struct WireStreamOptions {
    include_usage: bool,
}

impl From<&ProviderRequest> for WireRequest {
    fn from(request: &ProviderRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: request.stop.clone(),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.iter().map(WireTool::from).collect())
            },
            response_format: request.response_schema.clone().map(|schema| WireResponseFormat {
                r#type: "json_schema",
                json_schema: WireJsonSchema {
                    name: "response",
                    schema,
                    strict: true,
                },
            }),
            stream: request.stream,
            stream_options: request.stream.then_some(WireStreamOptions { include_usage: true }),
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        Self {
            role,
            content: message.content.clone(),
            tool_calls: if message.tool_calls.is_empty() {
                None
            } else {
                Some(message.tool_calls.iter().map(WireToolCall::from).collect())
            },
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            r#type: "function",
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

impl From<&ToolDefinition> for WireTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: WireFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireResponseToolCall>>,
}

#[derive(Deserialize)]
struct WireResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireResponseFunction,
}

#[derive(Deserialize)]
struct WireResponseFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    completion_tokens_details: Option<WireCompletionDetails>,
}

#[derive(Deserialize)]
struct WireCompletionDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            reasoning_tokens: self.completion_tokens_details.and_then(|d| d.reasoning_tokens),
        }
    }
}

impl WireResponse {
    /// Synthesize the chunk sequence a streaming upstream would have
    /// produced: deltas, usage, then a finish marker.
    fn into_chunks(self) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut finish = FinishReason::Stop;

        if let Some(choice) = self.choices.into_iter().next() {
            if let Some(content) = choice.message.content
                && !content.is_empty()
            {
                chunks.push(Chunk::TextDelta(content));
            }

            for (index, call) in choice.message.tool_calls.unwrap_or_default().into_iter().enumerate() {
                chunks.push(Chunk::ToolCallDelta(ToolCallDelta {
                    index,
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                }));
            }

            finish = parse_finish_reason(choice.finish_reason.as_deref());
        }

        if let Some(usage) = self.usage {
            chunks.push(Chunk::Usage(usage.into_usage()));
        }

        chunks.push(Chunk::Finish(finish));
        chunks
    }
}

#[derive(Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireStreamToolCall>>,
}

#[derive(Deserialize)]
struct WireStreamToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireResponseFunction>,
}

impl WireStreamChunk {
    fn into_chunks(self) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for choice in self.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                chunks.push(Chunk::TextDelta(content));
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match call.function {
                    Some(function) => (function.name, function.arguments),
                    None => (None, String::new()),
                };

                chunks.push(Chunk::ToolCallDelta(ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                }));
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                chunks.push(Chunk::Finish(parse_finish_reason(Some(reason))));
            }
        }

        if let Some(usage) = self.usage {
            chunks.push(Chunk::Usage(usage.into_usage()));
        }

        chunks
    }
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}
