//! Append-only run store with search.
//!
//! One store instance owns a data directory. Hot run fields live in a
//! columnar search table and in a primary-key map; both are rebuilt at open
//! from an append-only segment log that is fsynced before any write is
//! acknowledged. Large payloads (messages, tool traces) go to a
//! content-addressed blob store and the row only carries their digests.
//!
//! Consistency: a primary-key read of a just-written run always sees it (the
//! map is updated before the write acknowledges); the search table is fed by
//! an indexer task and trails writes by a bounded amount. [`RunStore::flush`]
//! waits for the indexer to catch up.

mod blob;
mod segment;
mod table;
mod types;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use config::StoreConfig;
use dashmap::DashMap;
use llm::ChatMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    blob::{BlobKind, BlobStore},
    segment::SegmentLog,
    table::SearchTable,
};

pub use table::{FieldOp, FieldQuery, Page, PageRequest};
pub use types::{
    Environment, Feedback, FeedbackOutcome, Run, RunStatus, RunSummary, ToolCallRecord, UnknownEnvironment, Version,
    VersionDraft,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("version '{0}' not found")]
    VersionNotFound(String),
}

/// The hot row as persisted: every queryable field plus blob digests for the
/// heavy payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunRow {
    id: String,
    tenant: String,
    agent_id: String,
    version_id: Option<String>,
    schema_id: Option<u32>,
    model: String,
    provider: String,
    status: RunStatus,
    error_kind: Option<String>,
    input_tokens: u64,
    output_tokens: u64,
    reasoning_tokens: Option<u64>,
    cost_usd: f64,
    duration_ms: u64,
    context_window_usage_percent: u8,
    attempt_count: u32,
    #[serde(default)]
    attempt_errors: Vec<String>,
    created_at_ms: i64,
    metadata: std::collections::BTreeMap<String, String>,
    feedback_token: Option<String>,
    request_digest: String,
    response_digest: String,
    trace_digest: String,
}

impl RunRow {
    fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            created_at_ms: self.created_at_ms,
            model: self.model.clone(),
            provider: self.provider.clone(),
            status: self.status,
            error_kind: self.error_kind.clone(),
            cost_usd: self.cost_usd,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            context_window_usage_percent: self.context_window_usage_percent,
            duration_ms: self.duration_ms,
            attempt_count: self.attempt_count,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum MetaRecord {
    Version(Version),
    Deployment {
        tenant: String,
        agent_id: String,
        schema_id: u32,
        environment: Environment,
        version_id: String,
        created_at_ms: i64,
    },
    Feedback(Feedback),
}

type DeployKey = (String, String, u32, Environment);

enum IndexMessage {
    Row(String, RunSummary),
    Flush(oneshot::Sender<()>),
}

struct StoreInner {
    blobs: BlobStore,
    runs_log: SegmentLog,
    meta_log: SegmentLog,
    by_id: DashMap<String, RunRow>,
    table: SearchTable,
    /// Versions per (tenant, agent), in creation order.
    versions: DashMap<(String, String), Vec<Version>>,
    /// Deployment pointers, copy-on-write so resolution never blocks on a
    /// swap in progress.
    deployments: RwLock<Arc<HashMap<DeployKey, String>>>,
    feedback: DashMap<(String, String), Feedback>,
    /// Serializes feedback log appends so last-writer-wins is well defined.
    feedback_write: tokio::sync::Mutex<()>,
    /// Serializes version numbering and deployment swaps.
    meta_write: tokio::sync::Mutex<()>,
    index_tx: mpsc::Sender<IndexMessage>,
}

/// Handle to one open store. Cheap to clone.
#[derive(Clone)]
pub struct RunStore {
    inner: Arc<StoreInner>,
}

impl RunStore {
    /// Open (or create) the store under the configured data directory and
    /// replay its logs.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let root = &config.path;
        std::fs::create_dir_all(root)?;

        let blobs = BlobStore::open(root)?;

        let by_id: DashMap<String, RunRow> = DashMap::new();
        let table = SearchTable::default();
        let runs_log = SegmentLog::open::<RunRow, _>(&root.join("runs"), "runs", |row| {
            table.insert(row.tenant.clone(), row.summary());
            by_id.insert(row.id.clone(), row);
        })?;

        let versions: DashMap<(String, String), Vec<Version>> = DashMap::new();
        let mut deployments: HashMap<DeployKey, String> = HashMap::new();
        let feedback: DashMap<(String, String), Feedback> = DashMap::new();

        let meta_log = SegmentLog::open::<MetaRecord, _>(&root.join("meta"), "meta", |record| match record {
            MetaRecord::Version(version) => {
                versions
                    .entry((version.tenant.clone(), version.agent_id.clone()))
                    .or_default()
                    .push(version);
            }
            MetaRecord::Deployment {
                tenant,
                agent_id,
                schema_id,
                environment,
                version_id,
                ..
            } => {
                deployments.insert((tenant, agent_id, schema_id, environment), version_id);
            }
            MetaRecord::Feedback(entry) => {
                let key = (entry.run_id.clone(), entry.user_id.clone().unwrap_or_default());
                feedback.insert(key, entry);
            }
        })?;

        let (index_tx, index_rx) = mpsc::channel(1024);

        let inner = Arc::new(StoreInner {
            blobs,
            runs_log,
            meta_log,
            by_id,
            table,
            versions,
            deployments: RwLock::new(Arc::new(deployments)),
            feedback,
            feedback_write: tokio::sync::Mutex::new(()),
            meta_write: tokio::sync::Mutex::new(()),
            index_tx,
        });

        tokio::spawn(run_indexer(Arc::clone(&inner), index_rx));

        Ok(Self { inner })
    }

    /// Persist one run. Durable (blobs written, row fsynced) before this
    /// returns; the search table catches up asynchronously.
    pub async fn append_run(&self, run: Run) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);

        let row = tokio::task::spawn_blocking(move || -> Result<RunRow, StoreError> {
            let request = serde_json::to_vec(&run.request_messages)?;
            let response = serde_json::to_vec(&run.response_messages)?;
            let trace = serde_json::to_vec(&run.tool_calls)?;

            let row = RunRow {
                request_digest: inner.blobs.put(BlobKind::RequestMessages, &request)?,
                response_digest: inner.blobs.put(BlobKind::ResponseMessages, &response)?,
                trace_digest: inner.blobs.put(BlobKind::ToolTrace, &trace)?,
                id: run.id,
                tenant: run.tenant,
                agent_id: run.agent_id,
                version_id: run.version_id,
                schema_id: run.schema_id,
                model: run.model,
                provider: run.provider,
                status: run.status,
                error_kind: run.error_kind,
                input_tokens: run.input_tokens,
                output_tokens: run.output_tokens,
                reasoning_tokens: run.reasoning_tokens,
                cost_usd: run.cost_usd,
                duration_ms: run.duration_ms,
                context_window_usage_percent: run.context_window_usage_percent,
                attempt_count: run.attempt_count,
                attempt_errors: run.attempt_errors,
                created_at_ms: run.created_at_ms,
                metadata: run.metadata,
                feedback_token: run.feedback_token,
            };

            inner.runs_log.append(&row)?;
            Ok(row)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;

        self.inner.by_id.insert(row.id.clone(), row.clone());

        let message = IndexMessage::Row(row.tenant.clone(), row.summary());
        if self.inner.index_tx.send(message).await.is_err() {
            log::error!("search indexer is gone; run {} will be missing from search", row.id);
        }

        Ok(())
    }

    /// Primary-key lookup, immediately consistent with `append_run`.
    pub async fn get_run(&self, tenant: &str, run_id: &str) -> Result<Option<Run>, StoreError> {
        let Some(row) = self.inner.by_id.get(run_id).map(|entry| entry.clone()) else {
            return Ok(None);
        };

        if row.tenant != tenant {
            return Ok(None);
        }

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || -> Result<Option<Run>, StoreError> {
            let request_messages: Vec<ChatMessage> = serde_json::from_slice(&inner.blobs.get(&row.request_digest)?)?;
            let response_messages: Vec<ChatMessage> = serde_json::from_slice(&inner.blobs.get(&row.response_digest)?)?;
            let tool_calls: Vec<ToolCallRecord> = serde_json::from_slice(&inner.blobs.get(&row.trace_digest)?)?;

            Ok(Some(Run {
                id: row.id,
                tenant: row.tenant,
                agent_id: row.agent_id,
                version_id: row.version_id,
                schema_id: row.schema_id,
                model: row.model,
                provider: row.provider,
                status: row.status,
                error_kind: row.error_kind,
                input_tokens: row.input_tokens,
                output_tokens: row.output_tokens,
                reasoning_tokens: row.reasoning_tokens,
                cost_usd: row.cost_usd,
                duration_ms: row.duration_ms,
                context_window_usage_percent: row.context_window_usage_percent,
                attempt_count: row.attempt_count,
                attempt_errors: row.attempt_errors,
                created_at_ms: row.created_at_ms,
                metadata: row.metadata,
                feedback_token: row.feedback_token,
                request_messages,
                response_messages,
                tool_calls,
            }))
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    /// Conjunctive field search over a tenant's runs, newest first.
    pub fn search(
        &self,
        tenant: &str,
        agent_id: Option<&str>,
        queries: &[FieldQuery],
        page: PageRequest,
    ) -> Page<RunSummary> {
        self.inner.table.search(tenant, agent_id, queries, page)
    }

    /// Wait until the search table has applied everything accepted so far.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.index_tx.send(IndexMessage::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Save a new immutable version for an agent. Assigns the agent-wide
    /// version label and the per-schema minor number; the schema id the
    /// caller supplies acts as the major component of the version's
    /// identity (see [`Version`]), so no separate major counter exists.
    pub async fn create_version(
        &self,
        tenant: &str,
        agent_id: &str,
        schema_id: u32,
        draft: VersionDraft,
        created_at_ms: i64,
    ) -> Result<Version, StoreError> {
        let _guard = self.inner.meta_write.lock().await;

        let key = (tenant.to_string(), agent_id.to_string());
        let (total, minor) = {
            let existing = self.inner.versions.get(&key);
            let total = existing.as_ref().map(|v| v.len()).unwrap_or(0);
            let minor = existing
                .as_ref()
                .map(|v| v.iter().filter(|version| version.schema_id == schema_id).count())
                .unwrap_or(0);
            (total, minor as u32)
        };

        let version = Version {
            tenant: tenant.to_string(),
            agent_id: agent_id.to_string(),
            schema_id,
            minor: minor + 1,
            version_id: format!("v{}", total + 1),
            messages: draft.messages,
            model: draft.model,
            temperature: draft.temperature,
            top_p: draft.top_p,
            max_tokens: draft.max_tokens,
            tools: draft.tools,
            input_schema: draft.input_schema,
            output_schema: draft.output_schema,
            schema_fingerprint: draft.schema_fingerprint,
            created_at_ms,
        };

        self.append_meta(MetaRecord::Version(version.clone())).await?;
        self.inner.versions.entry(key).or_default().push(version.clone());

        Ok(version)
    }

    pub fn get_version(&self, tenant: &str, agent_id: &str, version_id: &str) -> Option<Version> {
        self.inner
            .versions
            .get(&(tenant.to_string(), agent_id.to_string()))?
            .iter()
            .find(|version| version.version_id == version_id)
            .cloned()
    }

    /// Point (agent, schema, environment) at a version. The swap is atomic:
    /// a concurrent resolution sees the old target or the new one, never
    /// nothing.
    pub async fn deploy(
        &self,
        tenant: &str,
        agent_id: &str,
        version_id: &str,
        environment: Environment,
        created_at_ms: i64,
    ) -> Result<Version, StoreError> {
        let _guard = self.inner.meta_write.lock().await;

        let Some(version) = self.get_version(tenant, agent_id, version_id) else {
            return Err(StoreError::VersionNotFound(version_id.to_string()));
        };

        self.append_meta(MetaRecord::Deployment {
            tenant: tenant.to_string(),
            agent_id: agent_id.to_string(),
            schema_id: version.schema_id,
            environment,
            version_id: version_id.to_string(),
            created_at_ms,
        })
        .await?;

        let key = (
            tenant.to_string(),
            agent_id.to_string(),
            version.schema_id,
            environment,
        );

        if let Ok(mut guard) = self.inner.deployments.write() {
            let mut next: HashMap<DeployKey, String> = (**guard).clone();
            next.insert(key, version_id.to_string());
            *guard = Arc::new(next);
        }

        Ok(version)
    }

    /// Resolve a deployment pointer to its current version.
    pub fn resolve_deployment(
        &self,
        tenant: &str,
        agent_id: &str,
        schema_id: u32,
        environment: Environment,
    ) -> Option<Version> {
        let snapshot = self
            .inner
            .deployments
            .read()
            .map(|guard| Arc::clone(&guard))
            .ok()?;

        let version_id = snapshot.get(&(
            tenant.to_string(),
            agent_id.to_string(),
            schema_id,
            environment,
        ))?;

        self.get_version(tenant, agent_id, version_id)
    }

    /// Record feedback. Writes for the same (run, user) are serialized and
    /// the last accepted write wins.
    pub async fn upsert_feedback(&self, entry: Feedback) -> Result<(), StoreError> {
        let _guard = self.inner.feedback_write.lock().await;

        self.append_meta(MetaRecord::Feedback(entry.clone())).await?;

        let key = (entry.run_id.clone(), entry.user_id.clone().unwrap_or_default());
        self.inner.feedback.insert(key, entry);

        Ok(())
    }

    pub fn feedback_for_run(&self, run_id: &str) -> Vec<Feedback> {
        let mut entries: Vec<Feedback> = self
            .inner
            .feedback
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| entry.value().clone())
            .collect();

        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }

    async fn append_meta(&self, record: MetaRecord) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.meta_log.append(&record))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

async fn run_indexer(inner: Arc<StoreInner>, mut rx: mpsc::Receiver<IndexMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            IndexMessage::Row(tenant, summary) => inner.table.insert(tenant, summary),
            IndexMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
