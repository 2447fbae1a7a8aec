//! OpenAI-compatible wire types and their mapping onto the engine.

use std::collections::BTreeMap;

use engine::{CacheMode, CompletedRun, RunRequest};
use llm::{ChatMessage, FinishReason, MessageContent, Role, ToolCall, ToolCallDelta, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorBody;

/// `POST /v1/chat/completions` request body: the OpenAI shape plus the
/// gateway extensions under `metadata` and `extra_body`.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<StopSpec>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub tools: Option<Vec<WireToolSpec>>,
    #[serde(default)]
    pub response_format: Option<WireResponseFormat>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_body: ExtraBody,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExtraBody {
    #[serde(default)]
    pub input: BTreeMap<String, Value>,
    #[serde(default)]
    pub reply_to_run_id: Option<String>,
    #[serde(default)]
    pub use_cache: CacheMode,
    /// Hosted tools to enable in addition to `@tool` references.
    #[serde(default)]
    pub relay_tools: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StopSpec {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireMessage {
    pub role: WireRole,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum WireRole {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireToolCall {
    pub id: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireToolSpec {
    pub function: WireFunctionSpec,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFunctionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    serde_json::json!({"type": "object"})
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponseFormat {
    pub r#type: String,
    #[serde(default)]
    pub json_schema: Option<WireJsonSchema>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireJsonSchema {
    #[serde(default)]
    pub schema: Option<Value>,
}

impl ChatCompletionRequest {
    /// Lower the wire request into the engine's normalized form.
    pub(crate) fn into_run_request(self, tenant: String) -> RunRequest {
        let messages = self.messages.into_iter().map(WireMessage::into_chat_message).collect();

        let client_tools = self
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|spec| ToolDefinition {
                name: spec.function.name,
                description: spec.function.description,
                parameters: spec.function.parameters,
            })
            .collect();

        let response_schema = self.response_format.and_then(|format| {
            (format.r#type == "json_schema")
                .then_some(format.json_schema)
                .flatten()
                .and_then(|js| js.schema)
        });

        RunRequest {
            tenant,
            model: self.model,
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stop: match self.stop {
                Some(StopSpec::One(stop)) => vec![stop],
                Some(StopSpec::Many(stops)) => stops,
                None => Vec::new(),
            },
            client_tools,
            response_schema,
            stream: self.stream.unwrap_or(false),
            metadata: self.metadata,
            input: self.extra_body.input,
            reply_to_run_id: self.extra_body.reply_to_run_id,
            use_cache: self.extra_body.use_cache,
            hosted_tools: self.extra_body.relay_tools,
            byok_key: None,
            byok_provider: None,
        }
    }
}

impl WireMessage {
    fn into_chat_message(self) -> ChatMessage {
        ChatMessage {
            role: match self.role {
                WireRole::System | WireRole::Developer => Role::System,
                WireRole::User => Role::User,
                WireRole::Assistant => Role::Assistant,
                WireRole::Tool => Role::Tool,
            },
            content: self.content.unwrap_or_default(),
            tool_calls: self
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
            tool_call_id: self.tool_call_id,
        }
    }
}

fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub provider: String,
    pub choices: Vec<ResponseChoice>,
    pub usage: WireUsage,
    pub cost_usd: f64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "is_false")]
    pub cached: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseToolCall {
    pub id: String,
    pub r#type: &'static str,
    pub function: ResponseFunctionCall,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl From<CompletedRun> for ChatCompletionResponse {
    fn from(run: CompletedRun) -> Self {
        let tool_calls = run
            .message
            .tool_calls
            .iter()
            .map(|call| ResponseToolCall {
                id: call.id.clone(),
                r#type: "function",
                function: ResponseFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect();

        Self {
            id: run.run_id,
            object: "chat.completion",
            created: jiff::Timestamp::now().as_second(),
            model: run.model,
            provider: run.provider,
            choices: vec![ResponseChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant",
                    content: run.message.text_content(),
                    tool_calls,
                },
                finish_reason: finish_reason_str(run.finish_reason),
                feedback_token: run.feedback_token,
            }],
            usage: WireUsage {
                prompt_tokens: run.usage.input_tokens,
                completion_tokens: run.usage.output_tokens,
                total_tokens: run.usage.input_tokens + run.usage.output_tokens,
                reasoning_tokens: run.usage.reasoning_tokens,
            },
            cost_usd: run.cost_usd,
            duration_seconds: run.duration_seconds,
            cached: run.cached,
        }
    }
}

/// One SSE frame of a streamed completion.
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<WireUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::ErrorDetails>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChunkToolCall {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub r#type: &'static str,
    pub function: ChunkFunctionCall,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChunkFunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}

impl ChatCompletionChunk {
    fn frame(run_id: &str) -> Self {
        Self {
            id: run_id.to_string(),
            object: "chat.completion.chunk",
            created: jiff::Timestamp::now().as_second(),
            choices: Vec::new(),
            usage: None,
            cost_usd: None,
            duration_seconds: None,
            feedback_token: None,
            error: None,
        }
    }

    pub(crate) fn text(run_id: &str, content: String) -> Self {
        let mut chunk = Self::frame(run_id);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                content: Some(content),
                tool_calls: None,
            },
            finish_reason: None,
        });
        chunk
    }

    pub(crate) fn tool_call(run_id: &str, delta: ToolCallDelta) -> Self {
        let mut chunk = Self::frame(run_id);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                content: None,
                tool_calls: Some(vec![ChunkToolCall {
                    index: delta.index,
                    id: delta.id,
                    r#type: "function",
                    function: ChunkFunctionCall {
                        name: delta.name,
                        arguments: delta.arguments,
                    },
                }]),
            },
            finish_reason: None,
        });
        chunk
    }

    /// Final accounting frame carrying the feedback token.
    pub(crate) fn finish(run: &CompletedRun) -> Self {
        let mut chunk = Self::frame(&run.run_id);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta::default(),
            finish_reason: Some(finish_reason_str(run.finish_reason)),
        });
        chunk.usage = Some(WireUsage {
            prompt_tokens: run.usage.input_tokens,
            completion_tokens: run.usage.output_tokens,
            total_tokens: run.usage.input_tokens + run.usage.output_tokens,
            reasoning_tokens: run.usage.reasoning_tokens,
        });
        chunk.cost_usd = Some(run.cost_usd);
        chunk.duration_seconds = Some(run.duration_seconds);
        chunk.feedback_token = run.feedback_token.clone();
        chunk
    }

    /// Terminal error frame; the stream ends cleanly after this.
    pub(crate) fn error(body: ErrorBody) -> Self {
        let mut chunk = Self::frame("");
        chunk.error = Some(body.error);
        chunk
    }
}
