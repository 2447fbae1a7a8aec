//! Run-scoped feedback tokens.
//!
//! Every successful run is handed an opaque token that authorizes exactly
//! one action: writing feedback for that run. The token is an HS256-signed
//! claim set of `{run_id, exp}` under a server secret; it carries no tenant
//! data and cannot be used to read anything back.

use chrono::Duration;
use jwt_compact::{
    AlgorithmExt, Claims, Header, TimeOptions, UntrustedToken,
    alg::{Hs256, Hs256Key},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedbackTokenError {
    /// Malformed, tampered or wrongly signed token.
    #[error("invalid feedback token")]
    Invalid,

    /// Structurally valid token past its expiry.
    #[error("expired feedback token")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunClaims {
    run_id: String,
}

/// Stateless signer and verifier for feedback tokens.
pub struct FeedbackTokenSigner {
    key: Hs256Key,
    validity: Duration,
}

impl FeedbackTokenSigner {
    /// Build a signer from the configured secret and token lifetime.
    pub fn new(secret: &SecretString, validity: std::time::Duration) -> Self {
        Self {
            key: Hs256Key::new(secret.expose_secret().as_bytes()),
            validity: Duration::from_std(validity).unwrap_or_else(|_| Duration::days(90)),
        }
    }

    /// Mint a token scoped to one run id.
    pub fn sign(&self, run_id: &str) -> String {
        let claims = Claims::new(RunClaims {
            run_id: run_id.to_string(),
        })
        .set_duration_and_issuance(&TimeOptions::default(), self.validity);

        Hs256
            .token(&Header::empty(), &claims, &self.key)
            .unwrap_or_default()
    }

    /// Verify a token and return the run id it is scoped to.
    pub fn verify(&self, token: &str) -> Result<String, FeedbackTokenError> {
        let untrusted = UntrustedToken::new(token).map_err(|_| FeedbackTokenError::Invalid)?;

        let token: jwt_compact::Token<RunClaims> = Hs256
            .validator(&self.key)
            .validate(&untrusted)
            .map_err(|_| FeedbackTokenError::Invalid)?;

        token
            .claims()
            .validate_expiration(&TimeOptions::default())
            .map_err(|_| FeedbackTokenError::Expired)?;

        Ok(token.claims().custom.run_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> FeedbackTokenSigner {
        FeedbackTokenSigner::new(
            &SecretString::from("test-secret".to_string()),
            std::time::Duration::from_secs(3600),
        )
    }

    #[test]
    fn sign_verify_round_trip() {
        let signer = signer();
        let token = signer.sign("run_01ABCDEF");

        assert_eq!(signer.verify(&token).unwrap(), "run_01ABCDEF");
    }

    #[test]
    fn tampered_token_is_invalid() {
        let signer = signer();
        let mut token = signer.sign("run_01ABCDEF");

        // Flip a character in the signature section.
        let flipped = if token.ends_with('A') { 'B' } else { 'A' };
        token.pop();
        token.push(flipped);

        assert_eq!(signer.verify(&token), Err(FeedbackTokenError::Invalid));
    }

    #[test]
    fn token_from_another_secret_is_invalid() {
        let signer_a = signer();
        let signer_b = FeedbackTokenSigner::new(
            &SecretString::from("other-secret".to_string()),
            std::time::Duration::from_secs(3600),
        );

        let token = signer_b.sign("run_01ABCDEF");
        assert_eq!(signer_a.verify(&token), Err(FeedbackTokenError::Invalid));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let expired_signer = FeedbackTokenSigner {
            key: Hs256Key::new("test-secret".as_bytes()),
            validity: Duration::seconds(-60),
        };

        let token = expired_signer.sign("run_01ABCDEF");
        assert_eq!(signer().verify(&token), Err(FeedbackTokenError::Expired));
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(signer().verify("not-a-token"), Err(FeedbackTokenError::Invalid));
        assert_eq!(signer().verify(""), Err(FeedbackTokenError::Invalid));
    }

    #[test]
    fn tokens_are_opaque_of_tenant_data() {
        let token = signer().sign("run_01ABCDEF");
        let payload = token.split('.').nth(1).unwrap_or_default();

        // Claims hold the run id and expiry, nothing else.
        assert!(!payload.is_empty());
        assert_eq!(token.split('.').count(), 3);
    }
}
