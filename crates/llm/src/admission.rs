use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{Chunk, ChunkStream, ProviderError, ProviderErrorKind};

/// Bounded admission to one provider's connection pool.
///
/// A request waits up to `wait` for a slot; past that it fails fast as
/// overloaded rather than queueing unboundedly. The permit is held for the
/// whole lifetime of the response stream.
#[derive(Debug, Clone)]
pub(crate) struct Gate {
    semaphore: Arc<Semaphore>,
    wait: Duration,
    provider: String,
}

impl Gate {
    pub(crate) fn new(provider: impl Into<String>, slots: usize, wait: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(slots.max(1))),
            wait,
            provider: provider.into(),
        }
    }

    pub(crate) async fn admit(&self) -> Result<OwnedSemaphorePermit, ProviderError> {
        match tokio::time::timeout(self.wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(ProviderError::new(
                ProviderErrorKind::Internal,
                &self.provider,
                "admission gate closed",
            )),
            Err(_elapsed) => Err(ProviderError::new(
                ProviderErrorKind::Overloaded,
                &self.provider,
                "all upstream connections busy",
            )),
        }
    }

    /// Ties a permit to a stream so the slot frees only once the stream is
    /// exhausted or dropped.
    pub(crate) fn hold(stream: ChunkStream, permit: OwnedSemaphorePermit) -> ChunkStream {
        Box::pin(HoldPermit {
            inner: stream,
            _permit: permit,
        })
    }
}

struct HoldPermit {
    inner: ChunkStream,
    _permit: OwnedSemaphorePermit,
}

impl Stream for HoldPermit {
    type Item = Result<Chunk, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_capacity_then_fails_fast() {
        let gate = Gate::new("openai", 2, Duration::from_millis(10));

        let first = gate.admit().await.unwrap();
        let _second = gate.admit().await.unwrap();

        let error = gate.admit().await.unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Overloaded);

        drop(first);
        gate.admit().await.unwrap();
    }
}
