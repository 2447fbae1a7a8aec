//! The uniform provider contract and its adapters.

pub(crate) mod anthropic;
pub(crate) mod google;
pub(crate) mod openai;

use async_trait::async_trait;
use catalog::ProviderKind;

use crate::{ChunkStream, ExecuteContext, ProviderError, ProviderErrorKind, ProviderRequest};

/// A driver for one upstream API family.
///
/// `execute` always resolves to a chunk stream: streaming upstreams are
/// decoded incrementally, non-streaming ones are synthesized into a text
/// delta, a usage chunk and a finish marker. Dropping the returned stream
/// cancels the upstream request, so callers race `ctx.cancel` while polling
/// rather than expecting the adapter to watch it mid-stream.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured instance name, e.g. `openai` or `openai-eu`.
    fn name(&self) -> &str;

    /// Which API family this instance speaks.
    fn kind(&self) -> ProviderKind;

    async fn execute(&self, request: ProviderRequest, ctx: &ExecuteContext) -> Result<ChunkStream, ProviderError>;
}

/// Pre-dispatch `max_tokens` guards shared by every adapter: a value below
/// the floor is a malformed request, a value past the model's context window
/// can never succeed and is reported as an overflow before any bytes go out.
pub(crate) fn check_max_tokens(provider: &str, request: &ProviderRequest) -> Result<(), ProviderError> {
    let Some(max_tokens) = request.max_tokens else {
        return Ok(());
    };

    if max_tokens == 0 {
        return Err(ProviderError::new(
            ProviderErrorKind::BadRequest,
            provider,
            "max_tokens must be at least 1",
        ));
    }

    if let Some(window) = request.context_window
        && max_tokens > window
    {
        return Err(ProviderError::new(
            ProviderErrorKind::ContextWindowExceeded,
            provider,
            format!("max_tokens {max_tokens} exceeds the model's context window of {window} tokens"),
        ));
    }

    Ok(())
}

/// Retry-After parsing for rate limit responses. Only the delta-seconds form
/// is honored; HTTP-date values are rare from model providers.
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<std::time::Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(std::time::Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use crate::messages::ChatMessage;

    use super::*;

    #[test]
    fn zero_max_tokens_is_a_bad_request() {
        let mut request = ProviderRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        request.max_tokens = Some(0);

        let error = check_max_tokens("openai", &request).unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::BadRequest);
    }

    #[test]
    fn max_tokens_past_window_is_overflow_before_dispatch() {
        let mut request = ProviderRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        request.max_tokens = Some(200_000);
        request.context_window = Some(128_000);

        let error = check_max_tokens("openai", &request).unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::ContextWindowExceeded);
    }

    #[test]
    fn max_tokens_within_window_passes() {
        let mut request = ProviderRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        request.max_tokens = Some(1024);
        request.context_window = Some(128_000);

        assert!(check_max_tokens("openai", &request).is_ok());
    }
}
