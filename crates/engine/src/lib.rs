//! The run engine.
//!
//! One [`Engine`] owns everything a run needs: the provider registry, the
//! model catalog, routing health, the hosted tool orchestrator, the run
//! store handle, the feedback token signer, the deterministic-response
//! cache, and the persistence queue. Per the shared-state contract, these
//! live in one process-scoped context passed into each run; there is no
//! other global mutable state.

mod assembler;
mod cache;
mod error;
mod events;
mod persist;
mod request;
mod run;

use std::sync::Arc;

use catalog::Catalog;
use config::Config;
use dashmap::DashMap;
use feedback_token::FeedbackTokenSigner;
use llm::ProviderSet;
use router::HealthTracker;
use serde::Serialize;
use store::RunStore;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tools::ToolOrchestrator;

pub use error::{EngineError, ErrorKind};
pub use events::RunEvent;
pub use request::{CacheMode, CompletedRun, RunRequest, RunStream, StreamItem};

/// Fingerprint of a stored prompt's input contract: the sorted root-level
/// template variables it references plus the canonical output schema. Used
/// when saving versions so that schema drift is observable.
pub fn schema_fingerprint(
    messages: &[llm::ChatMessage],
    output_schema: Option<&serde_json::Value>,
) -> Result<String, EngineError> {
    let mut keys = std::collections::BTreeSet::new();

    for message in messages {
        let parsed = template::Template::parse(&message.text_content())?;
        keys.extend(parsed.referenced_inputs().into_keys());
    }

    Ok(assembler::fingerprint(&keys, output_schema))
}

use crate::{
    events::EventBus,
    persist::PersistQueue,
    run::{Emitter, RunExecution, STREAM_CHANNEL_DEPTH},
};

pub(crate) struct EngineInner {
    pub(crate) config: Config,
    pub(crate) providers: ProviderSet,
    pub(crate) catalog: Catalog,
    pub(crate) health: HealthTracker,
    pub(crate) orchestrator: ToolOrchestrator,
    pub(crate) store: RunStore,
    pub(crate) signer: FeedbackTokenSigner,
    pub(crate) cache: cache::ResponseCache,
    pub(crate) persist: PersistQueue,
    pub(crate) events: EventBus,
    /// Per-tenant concurrency gates, created lazily for tenants with a
    /// configured cap.
    tenant_slots: DashMap<String, Arc<Semaphore>>,
}

/// Everything the health endpoint reports about the engine.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Observed (provider, model, score) triples.
    pub provider_health: Vec<ProviderHealth>,
    pub persist_pending: i64,
    pub persist_dropped: u64,
    pub persist_write_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub model: String,
    pub score: f64,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        config: Config,
        providers: ProviderSet,
        orchestrator: ToolOrchestrator,
        store: RunStore,
        signer: FeedbackTokenSigner,
    ) -> Self {
        let events = EventBus::new(256);
        events::spawn_log_subscriber(&events);

        let persist = PersistQueue::new(store.clone(), config.store.queue_depth);
        let cache = cache::ResponseCache::new(config.llm.cache_ttl);

        Self {
            inner: Arc::new(EngineInner {
                config,
                providers,
                catalog: Catalog,
                health: HealthTracker::new(),
                orchestrator,
                store,
                signer,
                cache,
                persist,
                events,
                tenant_slots: DashMap::new(),
            }),
        }
    }

    /// Execute one run to completion and return the finished response.
    pub async fn execute(&self, request: RunRequest, cancel: CancellationToken) -> Result<CompletedRun, EngineError> {
        let permit = self.admit_tenant(&request.tenant)?;

        let mut execution = RunExecution::new(Arc::clone(&self.inner), request, cancel, permit);
        let prepared = execution.prepare().await?;

        if let Some(hit) = prepared.cache_hit {
            log::debug!("serving run from response cache as {}", hit.run_id);
            return Ok(hit);
        }

        execution.drive(prepared, &Emitter::buffered()).await
    }

    /// Execute one run, streaming chunks as they arrive. Failures before the
    /// first provider byte surface as `Err`; later ones arrive in-band as
    /// the final stream item.
    pub async fn execute_stream(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunStream, EngineError> {
        let permit = self.admit_tenant(&request.tenant)?;

        let mut execution = RunExecution::new(Arc::clone(&self.inner), request, cancel, permit);
        let prepared = execution.prepare().await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_DEPTH);

        if let Some(hit) = prepared.cache_hit {
            let run_id = hit.run_id.clone();
            tokio::spawn(async move {
                let text = hit.message.text_content();
                if !text.is_empty() {
                    let _ = tx.send(StreamItem::TextDelta(text)).await;
                }
                let _ = tx.send(StreamItem::Final(hit)).await;
            });

            return Ok(RunStream::new(run_id, rx));
        }

        let run_id = execution.run_id.clone();
        tokio::spawn(async move {
            let emitter = Emitter::streaming(tx.clone());
            match execution.drive(prepared, &emitter).await {
                Ok(completed) => {
                    let _ = tx.send(StreamItem::Final(completed)).await;
                }
                Err(error) => {
                    let _ = tx.send(StreamItem::Error(error)).await;
                }
            }
        });

        Ok(RunStream::new(run_id, rx))
    }

    /// Snapshot for the health endpoint.
    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            provider_health: self
                .inner
                .health
                .entries()
                .into_iter()
                .map(|(provider, model, score)| ProviderHealth { provider, model, score })
                .collect(),
            persist_pending: self.inner.persist.pending(),
            persist_dropped: self.inner.persist.dropped(),
            persist_write_failures: self.inner.persist.write_failures(),
        }
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &RunStore {
        &self.inner.store
    }

    pub fn signer(&self) -> &FeedbackTokenSigner {
        &self.inner.signer
    }

    pub fn orchestrator(&self) -> &ToolOrchestrator {
        &self.inner.orchestrator
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    fn admit_tenant(&self, tenant: &str) -> Result<Option<tokio::sync::OwnedSemaphorePermit>, EngineError> {
        let Some(cap) = self
            .inner
            .config
            .tenants
            .get(tenant)
            .and_then(|t| t.max_concurrent_runs)
        else {
            return Ok(None);
        };

        let semaphore = self
            .inner
            .tenant_slots
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(cap)))
            .clone();

        match semaphore.try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => Err(EngineError::new(
                ErrorKind::RateLimited,
                format!("tenant '{tenant}' reached its concurrent run limit of {cap}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests;
