use std::sync::Arc;

use catalog::ProviderKind;
use config::{Config, ProviderType};

use crate::provider::{Provider, anthropic::AnthropicProvider, google::GoogleProvider, openai::OpenAiProvider};

/// Live provider instances, built once from configuration.
#[derive(Clone)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderSet {
    /// Instantiate one adapter per configured provider section.
    pub fn from_config(config: &Config) -> Self {
        let pool_size = config.llm.max_connections_per_provider;
        let admission_wait = config.llm.admission_wait;

        let mut providers: Vec<Arc<dyn Provider>> = Vec::with_capacity(config.providers.len());

        for (name, provider_config) in &config.providers {
            log::debug!("initializing provider '{name}'");

            let provider: Arc<dyn Provider> = match provider_config.r#type {
                ProviderType::OpenAi => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    provider_config,
                    pool_size,
                    admission_wait,
                )),
                ProviderType::Anthropic => Arc::new(AnthropicProvider::new(
                    name.clone(),
                    provider_config,
                    pool_size,
                    admission_wait,
                )),
                ProviderType::Google => Arc::new(GoogleProvider::new(
                    name.clone(),
                    provider_config,
                    pool_size,
                    admission_wait,
                )),
            };

            providers.push(provider);
        }

        log::debug!("provider registry initialized with {} instance(s)", providers.len());

        Self { providers }
    }

    /// Build a registry from already-constructed providers. Exists for tests
    /// that substitute scripted providers.
    pub fn from_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Instance names serving a given API family, in configuration order.
    pub fn names_of_kind(&self, kind: ProviderKind) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.kind() == kind)
            .map(|p| p.name())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
