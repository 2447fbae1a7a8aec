//! Google generative language API adapter.
//!
//! Tool calls arrive as complete `functionCall` parts rather than argument
//! fragments, and the API never assigns call ids, so this adapter numbers
//! calls itself and synthesizes ids from those numbers.

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

const DEFAULT_GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub(crate) struct GoogleProvider {
    client: Client,
    base_url: String,
    name: String,
    api_key: SecretString,
    gate: Gate,
}

impl GoogleProvider {
    pub fn new(name: String, config: &ProviderConfig, pool_size: usize, admission_wait: std::time::Duration) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GOOGLE_API_URL.to_string());

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
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn execute(&self, request: ProviderRequest, ctx: &ExecuteContext) -> Result<ChunkStream, ProviderError> {
        check_max_tokens(&self.name, &request)?;

        let permit = self.gate.admit().await?;
        let streaming = request.stream;
        let url = if streaming {
            format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, request.model)
        } else {
            format!("{}/models/{}:generateContent", self.base_url, request.model)
        };

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
            .header("x-goog-api-key", self.api_key(ctx).expose_secret())
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
            log::debug!("Google API error ({status}): {error_text}");

            return Err(ProviderError::from_status(&self.name, status.as_u16(), error_text, hint));
        }

        if streaming {
            let mut state = StreamState::default();

            let chunk_stream = response
                .bytes_stream()
                .eventsource()
                .filter_map(|event| async move {
                    match event {
                        Ok(event) => Some(event.data),
                        Err(e) => {
                            log::warn!("SSE decode error in Google stream: {e}");
                            None
                        }
                    }
                })
                .map(move |data| match sonic_rs::from_str::<WireResponse>(&data) {
                    Ok(frame) => state.translate(frame).into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(_) => {
                        log::warn!("failed to parse Google streaming frame");
                        Vec::new()
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
                    format!("failed to parse generateContent response: {e}"),
                )
            })?;

            let mut state = StreamState::default();
            let mut chunks = state.translate(wire);
            if !state.finished {
                chunks.push(Chunk::Finish(if state.saw_tool_call {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                }));
            }

            let chunks: Vec<Result<Chunk, ProviderError>> = chunks.into_iter().map(Ok).collect();
            Ok(Gate::hold(Box::pin(futures::stream::iter(chunks)), permit))
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireToolGroup>>,
}

#[derive(Serialize)]
struct WireSystemInstruction {
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
struct WireContent {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum WirePart {
    Text(String),
    FunctionCall {
        name: String,
        args: serde_json::Value,
    },
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireToolGroup {
    function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Serialize)]
struct WireFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ProviderRequest> for WireRequest {
    fn from(request: &ProviderRequest) -> Self {
        let system: Vec<WirePart> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| WirePart::Text(m.text_content()))
            .collect();

        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(WireContent::from)
            .collect();

        let generation_config = WireGenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.clone(),
            response_mime_type: request.response_schema.as_ref().map(|_| "application/json"),
            response_schema: request.response_schema.clone(),
        };

        Self {
            contents,
            system_instruction: if system.is_empty() {
                None
            } else {
                Some(WireSystemInstruction { parts: system })
            },
            generation_config: Some(generation_config),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(vec![WireToolGroup {
                    function_declarations: request.tools.iter().map(WireFunctionDeclaration::from).collect(),
                }])
            },
        }
    }
}

impl From<&ChatMessage> for WireContent {
    fn from(message: &ChatMessage) -> Self {
        match message.role {
            Role::Assistant => {
                let mut parts = Vec::new();
                let text = message.text_content();
                if !text.is_empty() {
                    parts.push(WirePart::Text(text));
                }
                for call in &message.tool_calls {
                    parts.push(WirePart::FunctionCall {
                        name: call.name.clone(),
                        args: serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null),
                    });
                }
                WireContent { role: "model", parts }
            }
            Role::Tool => WireContent {
                role: "user",
                parts: vec![WirePart::FunctionResponse {
                    // The id carries the function name for this API; the
                    // registry encodes it as `<name>:<index>` when needed.
                    name: message
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| id.split(':').next())
                        .unwrap_or_default()
                        .to_string(),
                    response: serde_json::from_str(&message.text_content())
                        .unwrap_or_else(|_| serde_json::json!({ "content": message.text_content() })),
                }],
            },
            _ => WireContent {
                role: "user",
                parts: vec![WirePart::Text(message.text_content())],
            },
        }
    }
}

impl From<&ToolDefinition> for WireFunctionDeclaration {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<WireResponseFunctionCall>,
}

#[derive(Deserialize)]
struct WireResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase")]
struct WireUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// Accumulates per-stream facts: whether any function call was seen (the
/// API reports `STOP` even for tool turns) and whether a finish was emitted.
#[derive(Default)]
struct StreamState {
    tool_calls_seen: usize,
    saw_tool_call: bool,
    finished: bool,
    usage: Option<WireUsageMetadata>,
}

impl StreamState {
    fn translate(&mut self, frame: WireResponse) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        if let Some(usage) = frame.usage_metadata {
            self.usage = Some(usage);
        }

        let mut finish_reason = None;

        for candidate in frame.candidates {
            for part in candidate.content.into_iter().flat_map(|c| c.parts) {
                if let Some(text) = part.text
                    && !text.is_empty()
                {
                    chunks.push(Chunk::TextDelta(text));
                }

                if let Some(call) = part.function_call {
                    let index = self.tool_calls_seen;
                    self.tool_calls_seen += 1;
                    self.saw_tool_call = true;

                    chunks.push(Chunk::ToolCallDelta(ToolCallDelta {
                        index,
                        id: Some(format!("{}:{index}", call.name)),
                        name: Some(call.name),
                        arguments: call.args.to_string(),
                    }));
                }
            }

            if let Some(reason) = candidate.finish_reason {
                finish_reason = Some(reason);
            }
        }

        if let Some(reason) = finish_reason {
            if let Some(usage) = self.usage.take() {
                chunks.push(Chunk::Usage(Usage {
                    input_tokens: usage.prompt_token_count,
                    output_tokens: usage.candidates_token_count,
                    reasoning_tokens: None,
                }));
            }

            chunks.push(Chunk::Finish(self.parse_finish(&reason)));
            self.finished = true;
        }

        chunks
    }

    fn parse_finish(&self, reason: &str) -> FinishReason {
        match reason {
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => FinishReason::ContentFilter,
            _ if self.saw_tool_call => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }
}
