//! Hosted tool configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Credentials and limits for server-executed tools.
///
/// Tools degrade gracefully: a missing credential disables the tools that
/// need it instead of failing startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Google Custom Search API key; absent disables `web-search`.
    pub search_api_key: Option<SecretString>,
    /// Google Custom Search engine id, required together with the key.
    pub search_engine_id: Option<String>,
    /// Perplexity API key; absent disables the `perplexity-*` tools.
    pub perplexity_api_key: Option<SecretString>,
    /// Per-invocation timeout.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub timeout: Duration,
    /// Tool calls executed in parallel within one run.
    pub max_concurrent: usize,
    /// User-Agent header for `browser-text` fetches.
    pub browser_user_agent: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_api_key: None,
            search_engine_id: None,
            perplexity_api_key: None,
            timeout: Duration::from_secs(15),
            max_concurrent: 4,
            browser_user_agent: "relay/0.1".to_string(),
        }
    }
}
