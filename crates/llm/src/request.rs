use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::messages::{ChatMessage, ToolDefinition};

/// A fully normalized request ready for one provider attempt.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Provider-native model identifier.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    pub tools: Vec<ToolDefinition>,
    /// JSON schema the response must conform to, when structured output was
    /// requested.
    pub response_schema: Option<serde_json::Value>,
    /// Whether to stream from the upstream. Adapters synthesize a stream
    /// either way, so this only controls the upstream wire mode.
    pub stream: bool,
    /// Context window of the model, when known. Used for the pre-dispatch
    /// `max_tokens` ceiling check.
    pub context_window: Option<u32>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: Vec::new(),
            tools: Vec::new(),
            response_schema: None,
            stream: false,
            context_window: None,
        }
    }
}

/// Runtime context for one provider attempt.
///
/// Carries the per-run cancellation signal and an optional user-supplied API
/// key that overrides the configured one (BYOK).
#[derive(Debug, Clone, Default)]
pub struct ExecuteContext {
    pub cancel: CancellationToken,
    pub api_key_override: Option<SecretString>,
}
