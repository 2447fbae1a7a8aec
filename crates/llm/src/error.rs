use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Normalized classification of an upstream failure.
///
/// Every provider-specific status code and error payload is folded into this
/// set; the router decides retry versus terminal from the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    RateLimited,
    Overloaded,
    BadRequest,
    AuthFailed,
    ContextWindowExceeded,
    ContentFiltered,
    Timeout,
    Network,
    Internal,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Overloaded => "overloaded",
            ProviderErrorKind::BadRequest => "bad_request",
            ProviderErrorKind::AuthFailed => "auth_failed",
            ProviderErrorKind::ContextWindowExceeded => "context_window_exceeded",
            ProviderErrorKind::ContentFiltered => "content_filtered",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upstream failure with enough context for diagnostics: which provider,
/// the raw code it reported, and a retry hint when the provider gave one.
#[derive(Debug, Clone, Error)]
#[error("provider '{provider}' {kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub provider: String,
    pub message: String,
    /// Provider-native error code or HTTP status, for diagnostics only.
    pub raw_code: Option<String>,
    /// Retry-After hint from a rate limit response.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.into(),
            message: message.into(),
            raw_code: None,
            retry_after: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.raw_code = Some(code.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Map an HTTP error status plus response body into the normalized
    /// taxonomy. The body is sniffed for the few conditions providers hide
    /// behind a generic 400.
    pub fn from_status(provider: &str, status: u16, body: String, retry_after: Option<Duration>) -> Self {
        let kind = match status {
            400 | 404 | 422 => classify_bad_request(&body),
            401 | 403 => ProviderErrorKind::AuthFailed,
            408 => ProviderErrorKind::Timeout,
            413 => ProviderErrorKind::ContextWindowExceeded,
            429 => ProviderErrorKind::RateLimited,
            502 | 503 | 529 => ProviderErrorKind::Overloaded,
            _ => ProviderErrorKind::Internal,
        };

        Self {
            kind,
            provider: provider.to_string(),
            message: body,
            raw_code: Some(status.to_string()),
            retry_after,
        }
    }
}

/// Providers report context overflows and safety refusals as plain 400s;
/// only the body tells them apart from a malformed request.
fn classify_bad_request(body: &str) -> ProviderErrorKind {
    let lowered = body.to_ascii_lowercase();

    if lowered.contains("context_length_exceeded")
        || lowered.contains("context window")
        || lowered.contains("prompt is too long")
        || lowered.contains("token count exceeds")
    {
        ProviderErrorKind::ContextWindowExceeded
    } else if lowered.contains("content_filter") || lowered.contains("content management policy") {
        ProviderErrorKind::ContentFiltered
    } else {
        ProviderErrorKind::BadRequest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_map_to_retryable_kinds() {
        let rate_limited = ProviderError::from_status("openai", 429, "slow down".into(), None);
        assert_eq!(rate_limited.kind, ProviderErrorKind::RateLimited);

        let overloaded = ProviderError::from_status("anthropic", 529, "overloaded".into(), None);
        assert_eq!(overloaded.kind, ProviderErrorKind::Overloaded);
    }

    #[test]
    fn context_overflow_is_sniffed_from_400_bodies() {
        let error = ProviderError::from_status(
            "openai",
            400,
            r#"{"error":{"code":"context_length_exceeded"}}"#.into(),
            None,
        );

        assert_eq!(error.kind, ProviderErrorKind::ContextWindowExceeded);
        assert_eq!(error.raw_code.as_deref(), Some("400"));
    }

    #[test]
    fn content_filter_is_sniffed_from_400_bodies() {
        let error = ProviderError::from_status("openai", 400, r#"{"code":"content_filter"}"#.into(), None);
        assert_eq!(error.kind, ProviderErrorKind::ContentFiltered);
    }

    #[test]
    fn plain_400_stays_bad_request() {
        let error = ProviderError::from_status("openai", 400, "missing field".into(), None);
        assert_eq!(error.kind, ProviderErrorKind::BadRequest);
    }

    #[test]
    fn display_includes_provider_and_kind() {
        let error = ProviderError::new(ProviderErrorKind::Timeout, "google", "deadline exceeded");
        insta::assert_snapshot!(error.to_string(), @"provider 'google' timeout: deadline exceeded");
    }
}
