//! Provider and run engine configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Upstream API family served by a provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI-compatible chat completions API.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Google generative language API.
    Google,
}

/// Configuration for one provider instance.
///
/// The instance name (the map key under `[providers.<name>]`) is what tenant
/// allow-lists and fallback orders refer to; several instances may share a
/// `type` and differ only in credentials or base URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Which adapter drives this instance.
    pub r#type: ProviderType,
    /// API key for the provider. Presence of the section enables the
    /// provider; the key itself may still be overridden per request through
    /// the BYOK header.
    pub api_key: SecretString,
    /// Custom base URL, e.g. for a proxy or a compatible self-hosted server.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Run engine tuning knobs, all optional with production defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Maximum provider attempts per run across the failover sequence.
    pub max_attempts: usize,
    /// Wall-clock budget for a single attempt.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub attempt_timeout: Duration,
    /// Maximum silence between two consecutive stream chunks.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub idle_timeout: Duration,
    /// Hosted tool turns allowed within a single attempt before the run
    /// fails with a tool budget error.
    pub tool_turn_budget: usize,
    /// Lifetime of cached responses for deterministic requests.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub cache_ttl: Duration,
    /// Connection pool bound per provider instance.
    pub max_connections_per_provider: usize,
    /// How long a request may wait for a pooled connection before failing
    /// fast as overloaded.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub admission_wait: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            attempt_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(20),
            tool_turn_budget: 8,
            cache_ttl: Duration::from_secs(60),
            max_connections_per_provider: 32,
            admission_wait: Duration::from_secs(2),
        }
    }
}
