//! Tenant bearer authentication.
//!
//! Tenants authenticate with the API key from their `[tenants.<name>]`
//! section. A configuration without tenants runs open, as a single-tenant
//! development deployment under the `default` tenant.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use config::Config;
use engine::ErrorKind;
use secrecy::ExposeSecret;

use crate::error::ApiError;

const BEARER_PREFIX_LENGTH: usize = 6;

/// Header carrying a user-supplied provider API key (BYOK).
const PROVIDER_API_KEY_HEADER: &str = "X-Provider-API-Key";
/// Header naming the provider instance the BYOK key belongs to.
const PROVIDER_NAME_HEADER: &str = "X-Provider-Name";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;

    // RFC 7235: the scheme is case-insensitive.
    if value.len() > BEARER_PREFIX_LENGTH
        && value[..BEARER_PREFIX_LENGTH].eq_ignore_ascii_case("bearer")
        && value.as_bytes()[BEARER_PREFIX_LENGTH] == b' '
    {
        let token = value[BEARER_PREFIX_LENGTH + 1..].trim();
        (!token.is_empty()).then_some(token)
    } else {
        None
    }
}

/// Resolve the calling tenant from the bearer key.
pub(crate) fn tenant_from_bearer(config: &Config, headers: &HeaderMap) -> Result<String, ApiError> {
    if config.tenants.is_empty() {
        return Ok("default".to_string());
    }

    let Some(token) = bearer_token(headers) else {
        return Err(ApiError::new(ErrorKind::AuthFailed, "missing bearer token"));
    };

    config
        .tenants
        .iter()
        .find(|(_, tenant)| tenant.api_key.expose_secret() == token)
        .map(|(name, _)| name.clone())
        .ok_or_else(|| ApiError::new(ErrorKind::AuthFailed, "unknown API key"))
}

/// Check that the bearer key authorizes the tenant named in the path.
pub(crate) fn authorize_tenant(config: &Config, headers: &HeaderMap, tenant: &str) -> Result<(), ApiError> {
    if config.tenants.is_empty() {
        return Ok(());
    }

    let authenticated = tenant_from_bearer(config, headers)?;
    if authenticated == tenant {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorKind::AuthFailed,
            format!("key does not authorize tenant '{tenant}'"),
        ))
    }
}

/// Extract the BYOK key and its provider instance name, when supplied.
pub(crate) fn byok_from_headers(headers: &HeaderMap) -> (Option<secrecy::SecretString>, Option<String>) {
    let key = headers
        .get(PROVIDER_API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|key| secrecy::SecretString::from(key.to_string()));

    let provider = headers
        .get(PROVIDER_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    (key, provider)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn config_with_tenant() -> Config {
        toml::from_str(indoc::indoc! {r#"
            [tenants.acme]
            api_key = "relay-acme-key"
        "#})
        .unwrap()
    }

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).unwrap());
        headers
    }

    #[test]
    fn open_mode_without_tenants() {
        let config = Config::default();
        assert_eq!(tenant_from_bearer(&config, &HeaderMap::new()).unwrap(), "default");
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let config = config_with_tenant();

        for auth in ["Bearer relay-acme-key", "bearer relay-acme-key", "BEARER relay-acme-key"] {
            assert_eq!(tenant_from_bearer(&config, &headers(auth)).unwrap(), "acme");
        }
    }

    #[test]
    fn wrong_or_missing_key_is_rejected() {
        let config = config_with_tenant();

        assert!(tenant_from_bearer(&config, &HeaderMap::new()).is_err());
        assert!(tenant_from_bearer(&config, &headers("Bearer nope")).is_err());
        assert!(tenant_from_bearer(&config, &headers("Basic abc")).is_err());
        assert!(tenant_from_bearer(&config, &headers("Bearer")).is_err());
    }

    #[test]
    fn path_tenant_must_match_the_key() {
        let config = config_with_tenant();
        let headers = headers("Bearer relay-acme-key");

        assert!(authorize_tenant(&config, &headers, "acme").is_ok());
        assert!(authorize_tenant(&config, &headers, "globex").is_err());
    }
}
