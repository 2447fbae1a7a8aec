//! Feedback token signing configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Settings for the stateless feedback token signer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    /// HMAC secret for feedback tokens. Required; rotate by restarting with a
    /// new value (outstanding tokens stop verifying).
    pub secret: Option<SecretString>,
    /// How long a minted feedback token stays valid.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub token_ttl: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret: None,
            token_ttl: Duration::from_secs(90 * 24 * 3600),
        }
    }
}
