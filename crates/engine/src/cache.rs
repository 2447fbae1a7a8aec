//! Deterministic response cache.
//!
//! Only requests that can be deterministic are cacheable: temperature zero
//! and `use_cache` not set to `never`. The key is a digest over everything
//! that shapes the completion; a hit replays the prior run verbatim,
//! including its run id and feedback token, and writes no new record.

use std::{fmt::Write as _, sync::Arc, time::Duration};

use llm::ChatMessage;
use mini_moka::sync::Cache;
use sha2::{Digest as _, Sha256};

use crate::request::{CacheMode, CompletedRun};

pub(crate) struct ResponseCache {
    cache: Cache<String, Arc<CompletedRun>>,
}

impl ResponseCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(4096)
                .time_to_live(ttl.max(Duration::from_secs(1)))
                .build(),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<CompletedRun>> {
        self.cache.get(&key.to_string())
    }

    pub(crate) fn insert(&self, key: String, run: CompletedRun) {
        self.cache.insert(key, Arc::new(run));
    }
}

/// Everything that shapes a completion, borrowed for key derivation.
pub(crate) struct CacheKeyInput<'a> {
    pub tenant: &'a str,
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_names: &'a [String],
    pub response_schema: Option<&'a serde_json::Value>,
    pub mode: CacheMode,
}

/// Cache key for a normalized request, or `None` when the request is not
/// cacheable.
pub(crate) fn cache_key(input: &CacheKeyInput<'_>) -> Option<String> {
    if input.mode == CacheMode::Never {
        return None;
    }

    // Anything but an explicit zero temperature is non-deterministic.
    if input.temperature.unwrap_or(1.0) != 0.0 {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(input.tenant.as_bytes());
    hasher.update([0]);
    hasher.update(input.model.as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::to_vec(input.messages).unwrap_or_default());
    hasher.update([0]);
    hasher.update(input.max_tokens.unwrap_or_default().to_le_bytes());
    for name in input.tool_names {
        hasher.update(name.as_bytes());
        hasher.update([0]);
    }
    if let Some(schema) = input.response_schema {
        hasher.update(schema.to_string().as_bytes());
    }

    let digest = hasher.finalize();
    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }

    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_for(temperature: Option<f32>, mode: CacheMode, text: &str) -> Option<String> {
        cache_key(&CacheKeyInput {
            tenant: "acme",
            model: "gpt-4o-mini",
            messages: &[ChatMessage::user(text)],
            temperature,
            max_tokens: None,
            tool_names: &[],
            response_schema: None,
            mode,
        })
    }

    #[test]
    fn only_deterministic_requests_are_cacheable() {
        assert!(key_for(Some(0.0), CacheMode::Auto, "hi").is_some());
        assert!(key_for(Some(0.7), CacheMode::Auto, "hi").is_none());
        assert!(key_for(None, CacheMode::Auto, "hi").is_none());
        assert!(key_for(Some(0.0), CacheMode::Never, "hi").is_none());
    }

    #[test]
    fn key_varies_with_content() {
        let a = key_for(Some(0.0), CacheMode::Auto, "hello").unwrap();
        let b = key_for(Some(0.0), CacheMode::Auto, "goodbye").unwrap();
        let a_again = key_for(Some(0.0), CacheMode::Auto, "hello").unwrap();

        assert_ne!(a, b);
        assert_eq!(a, a_again);
    }

    #[test]
    fn key_varies_with_tenant() {
        let for_tenant = |tenant: &str| {
            cache_key(&CacheKeyInput {
                tenant,
                model: "gpt-4o-mini",
                messages: &[ChatMessage::user("hi")],
                temperature: Some(0.0),
                max_tokens: None,
                tool_names: &[],
                response_schema: None,
                mode: CacheMode::Auto,
            })
            .unwrap()
        };

        assert_ne!(for_tenant("acme"), for_tenant("globex"));
    }
}
