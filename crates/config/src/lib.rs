//! Relay configuration structures to map the relay.toml configuration.

#![deny(missing_docs)]

mod llm;
mod loader;
mod server;
mod signing;
mod store;
mod tenants;
mod tools;

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

pub use llm::{LlmConfig, ProviderConfig, ProviderType};
pub use server::ServerConfig;
pub use signing::SigningConfig;
pub use store::StoreConfig;
pub use tenants::TenantConfig;
pub use tools::ToolsConfig;

/// Main configuration structure for the Relay gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Run store configuration settings.
    pub store: StoreConfig,
    /// Feedback token signing settings.
    pub signing: SigningConfig,
    /// Run engine tuning knobs.
    pub llm: LlmConfig,
    /// Upstream model providers, keyed by instance name.
    pub providers: IndexMap<String, ProviderConfig>,
    /// Hosted tool credentials and limits.
    pub tools: ToolsConfig,
    /// Tenants allowed to call the gateway, keyed by tenant name.
    pub tenants: IndexMap<String, TenantConfig>,
}

impl Config {
    /// Load configuration from a file path, expanding `{{ env.VAR }}`
    /// references before deserialization.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration can actually serve traffic.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }

    /// Provider instance names that serve a given upstream API family.
    pub fn providers_of_kind(&self, kind: ProviderType) -> impl Iterator<Item = &str> {
        self.providers
            .iter()
            .filter(move |(_, provider)| provider.r#type == kind)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                health_path: "/health",
            },
            store: StoreConfig {
                path: "",
                queue_depth: 256,
            },
            signing: SigningConfig {
                secret: None,
                token_ttl: 7776000s,
            },
            llm: LlmConfig {
                max_attempts: 4,
                attempt_timeout: 60s,
                idle_timeout: 20s,
                tool_turn_budget: 8,
                cache_ttl: 60s,
                max_connections_per_provider: 32,
                admission_wait: 2s,
            },
            providers: {},
            tools: ToolsConfig {
                search_api_key: None,
                search_engine_id: None,
                perplexity_api_key: None,
                timeout: 15s,
                max_concurrent: 4,
                browser_user_agent: "relay/0.1",
            },
            tenants: {},
        }
        "#);
    }

    #[test]
    fn parses_full_configuration() {
        let config: Config = toml::from_str(indoc::indoc! {r#"
            [server]
            listen_address = "127.0.0.1:8000"

            [store]
            path = "/var/lib/relay"

            [signing]
            secret = "super-secret"
            token_ttl = "30d"

            [providers.openai]
            type = "openai"
            api_key = "sk-test"

            [providers.anthropic]
            type = "anthropic"
            api_key = "sk-ant-test"

            [tools]
            search_api_key = "google-key"
            search_engine_id = "cx-id"

            [tenants.acme]
            api_key = "relay-acme-key"
            fallback_order = ["anthropic", "openai"]
            max_concurrent_runs = 16
        "#})
        .unwrap();

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.tenants["acme"].fallback_order, ["anthropic", "openai"]);
        assert_eq!(config.signing.token_ttl.as_secs(), 30 * 24 * 3600);
        config.validate().unwrap();
    }
}
