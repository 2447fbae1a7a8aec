//! Persisted entity types.

use std::collections::BTreeMap;

use llm::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// One executed tool call, attached to its run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    pub result: Value,
    /// `success` or `error`.
    pub status: String,
    pub started_at_ms: i64,
    pub duration_ms: u64,
}

/// One complete execution record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Time-ordered unique id.
    pub id: String,
    pub tenant: String,
    pub agent_id: String,
    pub version_id: Option<String>,
    pub schema_id: Option<u32>,
    /// Model as executed, after catalog resolution.
    pub model: String,
    /// Provider instance that served the successful (or final) attempt.
    pub provider: String,
    pub status: RunStatus,
    pub error_kind: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: Option<u64>,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub context_window_usage_percent: u8,
    pub attempt_count: u32,
    /// One line per failed attempt, e.g. `openai: rate_limited: …`.
    pub attempt_errors: Vec<String>,
    pub created_at_ms: i64,
    pub metadata: BTreeMap<String, String>,
    pub feedback_token: Option<String>,
    /// Request messages after template rendering.
    pub request_messages: Vec<ChatMessage>,
    pub response_messages: Vec<ChatMessage>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl Run {
    pub(crate) fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            created_at_ms: self.created_at_ms,
            model: self.model.clone(),
            provider: self.provider.clone(),
            status: self.status,
            error_kind: self.error_kind.clone(),
            cost_usd: self.cost_usd,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            context_window_usage_percent: self.context_window_usage_percent,
            duration_ms: self.duration_ms,
            attempt_count: self.attempt_count,
            metadata: self.metadata.clone(),
        }
    }
}

/// Hot fields of a run, the shape search results come back in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub agent_id: String,
    pub created_at_ms: i64,
    pub model: String,
    pub provider: String,
    pub status: RunStatus,
    pub error_kind: Option<String>,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub context_window_usage_percent: u8,
    pub duration_ms: u64,
    pub attempt_count: u32,
    pub metadata: BTreeMap<String, String>,
}

/// Deployment environment. Closed set; anything else is a request error at
/// the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

}

impl std::str::FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(UnknownEnvironment(other.to_string())),
        }
    }
}

/// Error for environment names outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEnvironment(pub String);

impl std::fmt::Display for UnknownEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown environment '{}'", self.0)
    }
}

impl std::error::Error for UnknownEnvironment {}

/// An immutable snapshot of prompt, model, parameters and tool set.
///
/// Identity is `(tenant, agent_id, schema_id, minor)`. The schema id doubles
/// as the major version component: it advances exactly when a save breaks
/// the input/output contract, while `minor` counts compatible saves within
/// that schema. There is no separate major counter. The agent-wide
/// `version_id` label is presentation and deployment targeting only; it
/// carries no structure of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub tenant: String,
    pub agent_id: String,
    /// Contract generation; the major half of the version number.
    pub schema_id: u32,
    /// Position within the schema's save sequence; the minor half.
    pub minor: u32,
    /// Agent-wide version label, `v1`, `v2`, …
    pub version_id: String,
    /// Stored prompt with template placeholders intact.
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Hosted tool names this version declares.
    pub tools: Vec<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    /// Fingerprint of the referenced input keys and output schema.
    pub schema_fingerprint: String,
    pub created_at_ms: i64,
}

/// The fields a tenant supplies when saving a version; the store assigns
/// identity and sequence numbers.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionDraft {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub schema_fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    Positive,
    Negative,
}

/// End-user feedback on one run. At most one row per (run, user); later
/// writes replace earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub run_id: String,
    /// Anonymous feedback sorts under the empty user id.
    #[serde(default)]
    pub user_id: Option<String>,
    pub outcome: FeedbackOutcome,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at_ms: i64,
}
