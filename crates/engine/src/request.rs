//! Engine-facing request and response types.

use std::{
    collections::BTreeMap,
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use llm::{ChatMessage, FinishReason, ToolDefinition, Usage};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Cache behavior requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Auto,
    Never,
}

/// One normalized chat-completion request, as handed over by the HTTP
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub tenant: String,
    /// Concrete model id or a deployment alias `agent/#schema/env`.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    /// Client-defined function tools. Never executed server-side; their
    /// calls end the turn and stream back to the caller.
    pub client_tools: Vec<ToolDefinition>,
    pub response_schema: Option<Value>,
    pub stream: bool,
    /// Free-form metadata. The `agent_id` key selects the agent; every key
    /// is indexed for search.
    pub metadata: BTreeMap<String, String>,
    /// Template variables.
    pub input: BTreeMap<String, Value>,
    pub reply_to_run_id: Option<String>,
    pub use_cache: CacheMode,
    /// Hosted tool names enabled in addition to `@tool` references.
    pub hosted_tools: Vec<String>,
    /// User-supplied provider key (BYOK) and the provider instance it is
    /// for.
    pub byok_key: Option<SecretString>,
    pub byok_provider: Option<String>,
}

impl RunRequest {
    /// The agent this run belongs to. A deployment alias overrides the
    /// metadata key; with neither, runs collect under `default`.
    pub fn agent_id(&self) -> String {
        self.metadata
            .get("agent_id")
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }
}

/// A finished run, the non-streaming response payload.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub run_id: String,
    /// The assistant turn: text content, plus tool calls when the model
    /// handed control back to the client.
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
    pub model: String,
    pub provider: String,
    pub usage: Usage,
    pub cost_usd: f64,
    pub duration_seconds: f64,
    /// Absent on cancelled runs.
    pub feedback_token: Option<String>,
    /// True when served from the deterministic-response cache.
    pub cached: bool,
}

/// One unit of a streamed run, already normalized for the wire.
#[derive(Debug, Clone)]
pub enum StreamItem {
    TextDelta(String),
    ToolCallDelta(llm::ToolCallDelta),
    /// Final accounting frame; always the last item on success.
    Final(CompletedRun),
    /// Terminal mid-stream failure; always the last item when present.
    Error(EngineError),
}

/// Stream of [`StreamItem`]s for one run, backed by a bounded channel so a
/// slow client applies back-pressure to the provider read loop.
pub struct RunStream {
    run_id: String,
    rx: mpsc::Receiver<StreamItem>,
}

impl RunStream {
    pub(crate) fn new(run_id: String, rx: mpsc::Receiver<StreamItem>) -> Self {
        Self { run_id, rx }
    }

    /// The id of the run this stream belongs to, known before the first
    /// chunk arrives.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Stream for RunStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
