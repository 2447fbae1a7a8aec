//! Per-tenant policy configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Limits and routing preferences for one tenant.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantConfig {
    /// Bearer key the tenant authenticates with.
    pub api_key: SecretString,
    /// Provider instances this tenant may route to. Unset allows all
    /// configured providers.
    #[serde(default)]
    pub allowed_providers: Option<Vec<String>>,
    /// Preferred failover order by provider instance name. Providers not
    /// listed keep their default ordering after the listed ones.
    #[serde(default)]
    pub fallback_order: Vec<String>,
    /// Per-attempt wall-clock override for this tenant.
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub attempt_timeout: Option<Duration>,
    /// Cap on concurrently executing runs. Unset means unlimited.
    #[serde(default)]
    pub max_concurrent_runs: Option<usize>,
}
