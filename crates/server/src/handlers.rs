//! Endpoint handlers.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response, Sse, sse::Event},
};
use axum_serde::Sonic;
use engine::{Engine, ErrorKind, StreamItem};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use store::{Environment, Feedback, FeedbackOutcome, FieldQuery, PageRequest, Run, RunSummary, VersionDraft};
use tokio_util::sync::CancellationToken;

use crate::{
    auth,
    error::ApiError,
    openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse},
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub engine: Engine,
    pub config: Arc<config::Config>,
}

/// Handle chat completion requests.
///
/// Supports both streaming and non-streaming responses: with `stream: true`
/// the response is Server-Sent Events ending in `data: [DONE]`, otherwise a
/// single JSON object. A client disconnect mid-stream cancels the run.
pub(crate) async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Sonic(request): Sonic<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let tenant = auth::tenant_from_bearer(&state.config, &headers)?;
    log::debug!(
        "chat completions for tenant '{tenant}', model '{}', {} message(s), streaming: {}",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    let mut run_request = request.into_run_request(tenant);
    (run_request.byok_key, run_request.byok_provider) = auth::byok_from_headers(&headers);

    let cancel = CancellationToken::new();

    if run_request.stream {
        let stream = state.engine.execute_stream(run_request, cancel.clone()).await?;
        let run_id = stream.run_id().to_string();

        // Dropping the SSE body (client gone) drops the guard, which
        // cancels the run.
        let guard = cancel.drop_guard();

        let event_stream = stream.map(move |item| {
            let _held = &guard;

            let chunk = match item {
                StreamItem::TextDelta(text) => ChatCompletionChunk::text(&run_id, text),
                StreamItem::ToolCallDelta(delta) => ChatCompletionChunk::tool_call(&run_id, delta),
                StreamItem::Final(completed) => ChatCompletionChunk::finish(&completed),
                StreamItem::Error(error) => {
                    log::debug!("stream for {run_id} ended with error: {error}");
                    ChatCompletionChunk::error(ApiError::from(error).body())
                }
            };

            let json = sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                log::error!("failed to serialize chunk: {e}");
                r#"{"error":{"kind":"internal","message":"serialization failed"}}"#.to_string()
            });

            Ok::<_, Infallible>(Event::default().data(json))
        });

        let with_done = event_stream.chain(futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().data("[DONE]"))
        }));

        Ok(Sse::new(with_done).into_response())
    } else {
        let completed = state.engine.execute(run_request, cancel).await?;
        Ok(Json(ChatCompletionResponse::from(completed)).into_response())
    }
}

#[derive(Serialize)]
pub(crate) struct ModelsResponse {
    object: &'static str,
    data: Vec<ModelListing>,
}

#[derive(Serialize)]
pub(crate) struct ModelListing {
    id: &'static str,
    object: &'static str,
    owned_by: &'static str,
    context_window: u32,
    input_price_per_million: f64,
    output_price_per_million: f64,
    capabilities: catalog::Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    replaced_by: Option<&'static str>,
}

/// The model catalog with pricing, context window and capabilities.
pub(crate) async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let data = state
        .engine
        .catalog()
        .models()
        .iter()
        .map(|entry| ModelListing {
            id: entry.id,
            object: "model",
            owned_by: entry.bindings.first().map(|kind| kind.as_str()).unwrap_or("relay"),
            context_window: entry.context_window,
            input_price_per_million: entry.input_price,
            output_price_per_million: entry.output_price,
            capabilities: entry.capabilities,
            replaced_by: entry.replaced_by,
        })
        .collect();

    Json(ModelsResponse {
        object: "list",
        data,
    })
}

/// Built-in tool listing; unauthenticated by design.
pub(crate) async fn hosted_tools(State(state): State<AppState>) -> Json<Vec<tools::ToolDescriptor>> {
    Json(state.engine.orchestrator().descriptors())
}

#[derive(Deserialize)]
pub(crate) struct FeedbackRequest {
    feedback_token: String,
    outcome: FeedbackOutcome,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct FeedbackResponse {
    run_id: String,
    recorded: bool,
}

/// Record feedback for a run. Unauthenticated: the token is the
/// authorization, and it only allows this one write.
pub(crate) async fn post_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let run_id = state
        .engine
        .signer()
        .verify(&request.feedback_token)
        .map_err(|e| ApiError::new(ErrorKind::AuthFailed, e.to_string()))?;

    state
        .engine
        .store()
        .upsert_feedback(Feedback {
            run_id: run_id.clone(),
            user_id: request.user_id,
            outcome: request.outcome,
            comment: request.comment,
            created_at_ms: jiff::Timestamp::now().as_millisecond(),
        })
        .await?;

    Ok(Json(FeedbackResponse {
        run_id,
        recorded: true,
    }))
}

/// Save a new version of an agent's prompt. The schema id in the path is
/// the major component of the version's identity; the store assigns the
/// per-schema minor and the agent-wide label.
pub(crate) async fn create_version(
    State(state): State<AppState>,
    Path((tenant, agent_id, schema_id)): Path<(String, String, u32)>,
    headers: HeaderMap,
    Json(mut draft): Json<VersionDraft>,
) -> Result<Json<store::Version>, ApiError> {
    auth::authorize_tenant(&state.config, &headers, &tenant)?;

    if draft.messages.is_empty() {
        return Err(ApiError::new(ErrorKind::InvalidRequest, "a version needs at least one message"));
    }
    if state.engine.catalog().get(&draft.model).is_none() {
        return Err(ApiError::new(
            ErrorKind::UnknownModel,
            format!("model '{}' is not in the catalog", draft.model),
        ));
    }

    draft.schema_fingerprint = engine::schema_fingerprint(&draft.messages, draft.output_schema.as_ref())?;

    let version = state
        .engine
        .store()
        .create_version(
            &tenant,
            &agent_id,
            schema_id,
            draft,
            jiff::Timestamp::now().as_millisecond(),
        )
        .await?;

    Ok(Json(version))
}

#[derive(Deserialize)]
pub(crate) struct DeployRequest {
    environment: Environment,
}

#[derive(Serialize)]
pub(crate) struct DeployResponse {
    agent_id: String,
    schema_id: u32,
    environment: Environment,
    version_id: String,
}

/// Point a deployment at a version. The swap is atomic.
pub(crate) async fn deploy_version(
    State(state): State<AppState>,
    Path((tenant, agent_id, version_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(request): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ApiError> {
    auth::authorize_tenant(&state.config, &headers, &tenant)?;

    let version = state
        .engine
        .store()
        .deploy(
            &tenant,
            &agent_id,
            &version_id,
            request.environment,
            jiff::Timestamp::now().as_millisecond(),
        )
        .await?;

    Ok(Json(DeployResponse {
        agent_id,
        schema_id: version.schema_id,
        environment: request.environment,
        version_id: version.version_id,
    }))
}

#[derive(Serialize)]
pub(crate) struct RunResponse {
    #[serde(flatten)]
    run: Run,
    feedback: Vec<Feedback>,
}

pub(crate) async fn get_run(
    State(state): State<AppState>,
    Path((tenant, agent_id, run_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<RunResponse>, ApiError> {
    auth::authorize_tenant(&state.config, &headers, &tenant)?;

    let run = state
        .engine
        .store()
        .get_run(&tenant, &run_id)
        .await?
        .filter(|run| run.agent_id == agent_id)
        .ok_or_else(|| ApiError::new(ErrorKind::InvalidRequest, format!("run '{run_id}' not found")))?;

    let feedback = state.engine.store().feedback_for_run(&run.id);

    Ok(Json(RunResponse { run, feedback }))
}

/// Search body: either a bare conjunction of field queries or an object
/// with pagination.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum SearchRequest {
    Queries(Vec<FieldQuery>),
    Paged {
        #[serde(default)]
        queries: Vec<FieldQuery>,
        #[serde(default)]
        offset: usize,
        #[serde(default = "default_search_limit")]
        limit: usize,
    },
}

fn default_search_limit() -> usize {
    20
}

#[derive(Serialize)]
pub(crate) struct SearchResponse {
    items: Vec<RunSummary>,
    total: usize,
    offset: usize,
    limit: usize,
}

pub(crate) async fn search_runs(
    State(state): State<AppState>,
    Path((tenant, agent_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    auth::authorize_tenant(&state.config, &headers, &tenant)?;

    let (queries, page) = match request {
        SearchRequest::Queries(queries) => (queries, PageRequest::default()),
        SearchRequest::Paged { queries, offset, limit } => (queries, PageRequest { offset, limit }),
    };

    let page = state.engine.store().search(&tenant, Some(&agent_id), &queries, page);

    Ok(Json(SearchResponse {
        items: page.items,
        total: page.total,
        offset: page.offset,
        limit: page.limit,
    }))
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    report: engine::HealthReport,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        report: state.engine.health_report(),
    })
}
