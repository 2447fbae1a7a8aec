//! Provider selection and failover planning.
//!
//! The router turns one normalized request into an ordered list of
//! [`Attempt`]s. The run engine consumes the list in order, moving to the
//! next entry on retryable failures and stopping on terminal ones; the
//! classification lives here so retry policy has a single home.

mod health;

use catalog::Catalog;
use llm::{ProviderErrorKind, ProviderSet};
use thiserror::Error;

pub use health::HealthTracker;

/// One (provider, model) try inside a run's failover sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Provider instance name.
    pub provider: String,
    /// Catalog model id, which the adapters use as the provider-native id.
    pub model: String,
}

/// What the request needs from a (provider, model) pair.
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    /// The requested model, after catalog resolution of deprecations.
    pub model: String,
    /// Capabilities the request exercises.
    pub required: catalog::Capabilities,
    /// Token estimate for the prompt, for the cost term of the ordering.
    pub estimated_input_tokens: u64,
    /// Expected completion budget, for the cost term of the ordering.
    pub expected_output_tokens: u64,
    /// Provider instance the caller supplied their own key for, preferred
    /// when present.
    pub byok_provider: Option<String>,
}

/// Tenant routing policy distilled from configuration.
#[derive(Debug, Clone, Default)]
pub struct TenantPolicy {
    pub allowed_providers: Option<Vec<String>>,
    pub fallback_order: Vec<String>,
}

impl From<&config::TenantConfig> for TenantPolicy {
    fn from(config: &config::TenantConfig) -> Self {
        Self {
            allowed_providers: config.allowed_providers.clone(),
            fallback_order: config.fallback_order.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("model '{0}' is not in the catalog")]
    UnknownModel(String),

    #[error("no provider can serve model '{model}': {reason}")]
    NoCapableProvider { model: String, reason: &'static str },
}

/// Errors worth spending another attempt on. Terminal kinds would fail the
/// same way anywhere: the request itself is at fault or the content was
/// refused.
pub fn is_retryable(kind: ProviderErrorKind) -> bool {
    matches!(
        kind,
        ProviderErrorKind::RateLimited
            | ProviderErrorKind::Overloaded
            | ProviderErrorKind::Timeout
            | ProviderErrorKind::Network
            | ProviderErrorKind::Internal
    )
}

/// Produce the ordered attempt list for a request.
///
/// Candidates are every configured provider instance bound to the model with
/// sufficient capabilities, filtered by the tenant allow-list and current
/// cool-downs, ordered by BYOK preference, tenant fallback order, declining
/// health and ascending estimated cost, then capped at `max_attempts`.
pub fn plan(
    requirements: &Requirements,
    tenant: &TenantPolicy,
    providers: &ProviderSet,
    catalog: &Catalog,
    health: &HealthTracker,
    max_attempts: usize,
) -> Result<Vec<Attempt>, PlanError> {
    let resolved = catalog
        .get(&requirements.model)
        .ok_or_else(|| PlanError::UnknownModel(requirements.model.clone()))?;
    let entry = resolved.entry;

    if !entry.capabilities.covers(&requirements.required) {
        return Err(PlanError::NoCapableProvider {
            model: entry.id.to_string(),
            reason: "the model lacks a required capability",
        });
    }

    let mut candidates: Vec<Candidate> = Vec::new();

    for kind in entry.bindings {
        for provider in providers.names_of_kind(*kind) {
            if let Some(allowed) = &tenant.allowed_providers
                && !allowed.iter().any(|name| name == provider)
            {
                continue;
            }

            candidates.push(Candidate {
                provider: provider.to_string(),
                byok_rank: match &requirements.byok_provider {
                    Some(byok) if byok == provider => 0,
                    _ => 1,
                },
                tenant_rank: tenant
                    .fallback_order
                    .iter()
                    .position(|name| name == provider)
                    .unwrap_or(usize::MAX),
                health: health.score(provider, entry.id),
                cost: entry.cost(requirements.estimated_input_tokens, requirements.expected_output_tokens),
            });
        }
    }

    if candidates.is_empty() {
        return Err(PlanError::NoCapableProvider {
            model: entry.id.to_string(),
            reason: "no configured provider is bound to it",
        });
    }

    let before_cooldown = candidates.len();
    candidates.retain(|candidate| health.is_available(&candidate.provider, entry.id));

    if candidates.is_empty() {
        log::warn!(
            "all {before_cooldown} candidate provider(s) for model '{}' are cooling down",
            entry.id
        );
        return Err(PlanError::NoCapableProvider {
            model: entry.id.to_string(),
            reason: "every bound provider is cooling down after repeated failures",
        });
    }

    candidates.sort_by(|a, b| {
        a.byok_rank
            .cmp(&b.byok_rank)
            .then(a.tenant_rank.cmp(&b.tenant_rank))
            .then(b.health.total_cmp(&a.health))
            .then(a.cost.total_cmp(&b.cost))
    });

    Ok(candidates
        .into_iter()
        .take(max_attempts.max(1))
        .map(|candidate| Attempt {
            provider: candidate.provider,
            model: entry.id.to_string(),
        })
        .collect())
}

struct Candidate {
    provider: String,
    byok_rank: u8,
    tenant_rank: usize,
    health: f64,
    cost: f64,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use catalog::ProviderKind;
    use llm::{ChunkStream, ExecuteContext, Provider, ProviderError, ProviderErrorKind, ProviderRequest};

    use super::*;

    struct DummyProvider {
        name: String,
        kind: ProviderKind,
    }

    impl DummyProvider {
        fn boxed(name: &str, kind: ProviderKind) -> Arc<dyn Provider> {
            Arc::new(Self {
                name: name.to_string(),
                kind,
            })
        }
    }

    #[async_trait]
    impl Provider for DummyProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn execute(&self, _: ProviderRequest, _: &ExecuteContext) -> Result<ChunkStream, ProviderError> {
            Err(ProviderError::new(ProviderErrorKind::Internal, &self.name, "dummy"))
        }
    }

    fn providers() -> ProviderSet {
        ProviderSet::from_providers(vec![
            DummyProvider::boxed("openai", ProviderKind::OpenAi),
            DummyProvider::boxed("openai-eu", ProviderKind::OpenAi),
            DummyProvider::boxed("anthropic", ProviderKind::Anthropic),
        ])
    }

    fn requirements(model: &str) -> Requirements {
        Requirements {
            model: model.to_string(),
            ..Requirements::default()
        }
    }

    #[test]
    fn plans_all_bound_providers_for_a_model() {
        let attempts = plan(
            &requirements("gpt-4o-mini"),
            &TenantPolicy::default(),
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            4,
        )
        .unwrap();

        let names: Vec<&str> = attempts.iter().map(|a| a.provider.as_str()).collect();
        assert_eq!(names, ["openai", "openai-eu"]);
        assert!(attempts.iter().all(|a| a.model == "gpt-4o-mini"));
    }

    #[test]
    fn unknown_model_is_an_error() {
        let error = plan(
            &requirements("made-up-model"),
            &TenantPolicy::default(),
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            4,
        )
        .unwrap_err();

        insta::assert_snapshot!(error.to_string(), @"model 'made-up-model' is not in the catalog");
    }

    #[test]
    fn tenant_allow_list_filters_candidates() {
        let tenant = TenantPolicy {
            allowed_providers: Some(vec!["openai-eu".to_string()]),
            fallback_order: Vec::new(),
        };

        let attempts = plan(
            &requirements("gpt-4o-mini"),
            &tenant,
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            4,
        )
        .unwrap();

        let names: Vec<&str> = attempts.iter().map(|a| a.provider.as_str()).collect();
        assert_eq!(names, ["openai-eu"]);
    }

    #[test]
    fn tenant_fallback_order_wins_over_config_order() {
        let tenant = TenantPolicy {
            allowed_providers: None,
            fallback_order: vec!["openai-eu".to_string()],
        };

        let attempts = plan(
            &requirements("gpt-4o-mini"),
            &tenant,
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            4,
        )
        .unwrap();

        assert_eq!(attempts[0].provider, "openai-eu");
    }

    #[test]
    fn byok_provider_is_preferred() {
        let mut reqs = requirements("gpt-4o-mini");
        reqs.byok_provider = Some("openai-eu".to_string());

        let attempts = plan(
            &reqs,
            &TenantPolicy::default(),
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            4,
        )
        .unwrap();

        assert_eq!(attempts[0].provider, "openai-eu");
    }

    #[test]
    fn unhealthy_provider_sorts_last() {
        let health = HealthTracker::new();
        for _ in 0..3 {
            health.record_failure("openai", "gpt-4o-mini");
        }

        let attempts = plan(
            &requirements("gpt-4o-mini"),
            &TenantPolicy::default(),
            &providers(),
            &Catalog,
            &health,
            4,
        )
        .unwrap();

        assert_eq!(attempts[0].provider, "openai-eu");
    }

    #[test]
    fn attempts_are_capped() {
        let attempts = plan(
            &requirements("gpt-4o-mini"),
            &TenantPolicy::default(),
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            1,
        )
        .unwrap();

        assert_eq!(attempts.len(), 1);
    }

    #[test]
    fn deprecated_model_plans_replacement() {
        let attempts = plan(
            &requirements("gpt-4o-mini"),
            &TenantPolicy::default(),
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            4,
        )
        .unwrap();
        let deprecated = plan(
            &requirements("gpt-3.5-turbo"),
            &TenantPolicy::default(),
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            4,
        )
        .unwrap();

        assert_eq!(attempts, deprecated);
    }

    #[test]
    fn capability_mismatch_is_reported() {
        let mut reqs = requirements("gpt-4o-mini");
        reqs.required = catalog::Capabilities {
            audio_input: true,
            ..catalog::Capabilities::default()
        };

        let error = plan(
            &reqs,
            &TenantPolicy::default(),
            &providers(),
            &Catalog,
            &HealthTracker::new(),
            4,
        )
        .unwrap_err();

        insta::assert_snapshot!(
            error.to_string(),
            @"no provider can serve model 'gpt-4o-mini': the model lacks a required capability"
        );
    }

    #[test]
    fn terminal_and_retryable_kinds_split_per_policy() {
        assert!(is_retryable(ProviderErrorKind::RateLimited));
        assert!(is_retryable(ProviderErrorKind::Overloaded));
        assert!(is_retryable(ProviderErrorKind::Timeout));
        assert!(is_retryable(ProviderErrorKind::Network));
        assert!(is_retryable(ProviderErrorKind::Internal));

        assert!(!is_retryable(ProviderErrorKind::BadRequest));
        assert!(!is_retryable(ProviderErrorKind::AuthFailed));
        assert!(!is_retryable(ProviderErrorKind::ContextWindowExceeded));
        assert!(!is_retryable(ProviderErrorKind::ContentFiltered));
    }
}
