//! Engine tests against scripted providers.
//!
//! No network: providers are scripted chunk sequences, and tool invocations
//! use arguments that fail fast before any fetch.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use catalog::ProviderKind;
use futures::StreamExt;
use llm::{
    ChatMessage, Chunk, ChunkStream, ExecuteContext, FinishReason, Provider, ProviderError, ProviderErrorKind,
    ProviderRequest, ProviderSet, ToolCallDelta, ToolDefinition, Usage,
};
use secrecy::SecretString;
use store::{RunStatus, RunStore, VersionDraft};
use tokio_util::sync::CancellationToken;
use tools::ToolOrchestrator;

use crate::{CacheMode, Engine, EngineError, ErrorKind, RunRequest, StreamItem};

#[derive(Clone)]
enum ScriptTurn {
    Fail(ProviderErrorKind),
    Respond(Vec<Chunk>),
}

struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<ScriptTurn>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(name: &str, script: Vec<ScriptTurn>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> Option<ProviderRequest> {
        self.last_request.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn execute(&self, request: ProviderRequest, _: &ExecuteContext) -> Result<ChunkStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some(request);
        }

        let turn = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(ScriptTurn::Fail(ProviderErrorKind::Internal));

        match turn {
            ScriptTurn::Fail(kind) => Err(ProviderError::new(kind, &self.name, "scripted failure")),
            ScriptTurn::Respond(chunks) => {
                let items: Vec<Result<Chunk, ProviderError>> = chunks.into_iter().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }
    }
}

fn pong_turn() -> ScriptTurn {
    ScriptTurn::Respond(vec![
        Chunk::TextDelta("PONG".into()),
        Chunk::Usage(Usage {
            input_tokens: 12,
            output_tokens: 2,
            reasoning_tokens: None,
        }),
        Chunk::Finish(FinishReason::Stop),
    ])
}

struct Harness {
    engine: Engine,
    store: RunStore,
    _dir: tempfile::TempDir,
}

fn harness(providers: Vec<Arc<dyn Provider>>, extra_config: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config_str = format!(
        indoc::indoc! {r#"
            [store]
            path = "{path}"

            [signing]
            secret = "engine-test-secret"

            [providers.openai]
            type = "openai"
            api_key = "sk-test"

            {extra}
        "#},
        path = dir.path().display(),
        extra = extra_config,
    );

    let config: config::Config = toml::from_str(&config_str).unwrap();
    let store = RunStore::open(&config.store).unwrap();
    let signer = feedback_token::FeedbackTokenSigner::new(
        &SecretString::from("engine-test-secret".to_string()),
        std::time::Duration::from_secs(3600),
    );
    let orchestrator = ToolOrchestrator::new(config.tools.clone());

    let engine = Engine::new(
        config,
        ProviderSet::from_providers(providers),
        orchestrator,
        store.clone(),
        signer,
    );

    Harness {
        engine,
        store,
        _dir: dir,
    }
}

fn request(model: &str, text: &str) -> RunRequest {
    RunRequest {
        tenant: "acme".to_string(),
        model: model.to_string(),
        messages: vec![ChatMessage::user(text)],
        metadata: BTreeMap::from([("agent_id".to_string(), "support".to_string())]),
        ..RunRequest::default()
    }
}

async fn persisted_run(harness: &Harness, run_id: &str) -> store::Run {
    harness.store.flush().await;
    // The persistence queue is fire-and-forget; give the writer a moment.
    for _ in 0..50 {
        if let Some(run) = harness.store.get_run("acme", run_id).await.unwrap() {
            return run;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    unreachable!("run {run_id} was never persisted");
}

#[tokio::test(flavor = "multi_thread")]
async fn non_streaming_success_persists_an_accounted_run() {
    let provider = ScriptedProvider::new("openai", vec![pong_turn()]);
    let harness = harness(vec![provider.clone()], "");

    let completed = harness
        .engine
        .execute(request("gpt-4o-mini", "Say PONG"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(completed.message.text_content(), "PONG");
    assert!(completed.cost_usd > 0.0);
    assert!(completed.run_id.starts_with("run_"));
    assert!(completed.feedback_token.is_some());
    assert_eq!(completed.provider, "openai");

    let run = persisted_run(&harness, &completed.run_id).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!((run.input_tokens, run.output_tokens), (12, 2));

    // cost = input·price_in + output·price_out, prices per million tokens.
    let entry = harness.engine.catalog().get("gpt-4o-mini").unwrap().entry;
    let expected = (12.0 * entry.input_price + 2.0 * entry.output_price) / 1_000_000.0;
    assert!((run.cost_usd - expected).abs() < f64::EPSILON);

    // The feedback token verifies against this exact run.
    let run_id = harness
        .engine
        .signer()
        .verify(run.feedback_token.as_deref().unwrap())
        .unwrap();
    assert_eq!(run_id, run.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn template_rendering_reaches_the_provider() {
    let provider = ScriptedProvider::new("openai", vec![pong_turn()]);
    let harness = harness(vec![provider.clone()], "");

    let mut req = request("gpt-4o-mini", "ignored");
    req.messages = vec![ChatMessage::system("Translate to French: {{ text }}")];
    req.input = BTreeMap::from([("text".to_string(), serde_json::json!("Hello"))]);

    harness.engine.execute(req, CancellationToken::new()).await.unwrap();

    let seen = provider.last_request().unwrap();
    assert_eq!(seen.messages[0].text_content(), "Translate to French: Hello");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_template_input_fails_before_any_attempt() {
    let provider = ScriptedProvider::new("openai", vec![pong_turn()]);
    let harness = harness(vec![provider.clone()], "");

    let mut req = request("gpt-4o-mini", "ignored");
    req.messages = vec![ChatMessage::system("Translate: {{ text }}")];

    let error = harness.engine.execute(req, CancellationToken::new()).await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::MissingInput);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn deployment_alias_resolves_and_is_recorded() {
    let provider = ScriptedProvider::new("openai", vec![pong_turn()]);
    let harness = harness(vec![provider.clone()], "");

    harness
        .store
        .create_version(
            "acme",
            "translator",
            1,
            VersionDraft {
                messages: vec![ChatMessage::system("Translate to French: {{ text }}")],
                model: "gpt-4o-mini".to_string(),
                temperature: Some(0.7),
                top_p: None,
                max_tokens: None,
                tools: Vec::new(),
                input_schema: None,
                output_schema: None,
                schema_fingerprint: String::new(),
            },
            1,
        )
        .await
        .unwrap();
    harness
        .store
        .deploy("acme", "translator", "v1", store::Environment::Production, 2)
        .await
        .unwrap();

    let mut req = request("translator/#1/production", "");
    req.messages = Vec::new();
    req.input = BTreeMap::from([("text".to_string(), serde_json::json!("Hello"))]);

    let completed = harness.engine.execute(req, CancellationToken::new()).await.unwrap();

    let run = persisted_run(&harness, &completed.run_id).await;
    assert_eq!(run.version_id.as_deref(), Some("v1"));
    assert_eq!(run.schema_id, Some(1));
    assert_eq!(run.agent_id, "translator");

    let seen = provider.last_request().unwrap();
    assert_eq!(seen.messages[0].text_content(), "Translate to French: Hello");
    assert_eq!(seen.temperature, Some(0.7));
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_failures_fail_over_to_the_next_provider() {
    let flaky = ScriptedProvider::new("openai", vec![ScriptTurn::Fail(ProviderErrorKind::RateLimited)]);
    let healthy = ScriptedProvider::new("openai-eu", vec![pong_turn()]);
    let harness = harness(
        vec![flaky.clone(), healthy.clone()],
        indoc::indoc! {r#"
            [providers.openai-eu]
            type = "openai"
            api_key = "sk-test-eu"
        "#},
    );

    let completed = harness
        .engine
        .execute(request("gpt-4o-mini", "Say PONG"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(completed.provider, "openai-eu");
    assert_eq!(flaky.calls(), 1);
    assert_eq!(healthy.calls(), 1);

    let run = persisted_run(&harness, &completed.run_id).await;
    assert_eq!(run.attempt_count, 2);
    assert_eq!(run.attempt_errors.len(), 1);
    assert!(run.attempt_errors[0].contains("rate_limited"));
}

#[tokio::test(flavor = "multi_thread")]
async fn terminal_failures_spend_no_further_attempts() {
    let bad = ScriptedProvider::new("openai", vec![ScriptTurn::Fail(ProviderErrorKind::AuthFailed)]);
    let never_called = ScriptedProvider::new("openai-eu", vec![pong_turn()]);
    let harness = harness(
        vec![bad.clone(), never_called.clone()],
        indoc::indoc! {r#"
            [providers.openai-eu]
            type = "openai"
            api_key = "sk-test-eu"
        "#},
    );

    let error = harness
        .engine
        .execute(request("gpt-4o-mini", "Say PONG"), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::AuthFailed);
    assert_eq!(never_called.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retryable_attempts_surface_provider_unavailable() {
    let a = ScriptedProvider::new("openai", vec![ScriptTurn::Fail(ProviderErrorKind::Overloaded)]);
    let b = ScriptedProvider::new("openai-eu", vec![ScriptTurn::Fail(ProviderErrorKind::Timeout)]);
    let harness = harness(
        vec![a, b],
        indoc::indoc! {r#"
            [providers.openai-eu]
            type = "openai"
            api_key = "sk-test-eu"
        "#},
    );

    let error = harness
        .engine
        .execute(request("gpt-4o-mini", "Say PONG"), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::ProviderUnavailable);
}

#[tokio::test(flavor = "multi_thread")]
async fn hosted_tool_loop_feeds_results_back() {
    let provider = ScriptedProvider::new(
        "openai",
        vec![
            ScriptTurn::Respond(vec![
                Chunk::ToolCallDelta(ToolCallDelta {
                    index: 0,
                    id: Some("call_1".into()),
                    name: Some("browser-text".into()),
                    // Scheme check fails fast, so no network is touched and
                    // the error folds into the tool result.
                    arguments: r#"{"url":"file:///etc/passwd"}"#.into(),
                }),
                Chunk::Usage(Usage {
                    input_tokens: 20,
                    output_tokens: 5,
                    reasoning_tokens: None,
                }),
                Chunk::Finish(FinishReason::ToolCalls),
            ]),
            ScriptTurn::Respond(vec![
                Chunk::TextDelta("Could not read the page.".into()),
                Chunk::Usage(Usage {
                    input_tokens: 40,
                    output_tokens: 6,
                    reasoning_tokens: None,
                }),
                Chunk::Finish(FinishReason::Stop),
            ]),
        ],
    );
    let harness = harness(vec![provider.clone()], "");

    let mut req = request("gpt-4o-mini", "Summarize the page");
    req.messages
        .insert(0, ChatMessage::system("Use @browser-text to read pages."));

    let completed = harness.engine.execute(req, CancellationToken::new()).await.unwrap();

    assert_eq!(completed.message.text_content(), "Could not read the page.");
    assert_eq!(provider.calls(), 2);

    // Both completions are billed.
    assert_eq!(completed.usage.input_tokens, 60);
    assert_eq!(completed.usage.output_tokens, 11);

    let run = persisted_run(&harness, &completed.run_id).await;
    assert_eq!(run.tool_calls.len(), 1);
    assert_eq!(run.tool_calls[0].name, "browser-text");
    assert_eq!(run.tool_calls[0].status, "error");

    // The second provider turn saw the tool result message.
    let seen = provider.last_request().unwrap();
    let roles: Vec<llm::Role> = seen.messages.iter().map(|m| m.role).collect();
    assert!(roles.contains(&llm::Role::Tool));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_tools_are_handed_back_not_executed() {
    let provider = ScriptedProvider::new(
        "openai",
        vec![ScriptTurn::Respond(vec![
            Chunk::ToolCallDelta(ToolCallDelta {
                index: 0,
                id: Some("call_w".into()),
                name: Some("get_weather".into()),
                arguments: r#"{"city":"Paris"}"#.into(),
            }),
            Chunk::Finish(FinishReason::ToolCalls),
        ])],
    );
    let harness = harness(vec![provider.clone()], "");

    let mut req = request("gpt-4o-mini", "Weather in Paris?");
    req.client_tools = vec![ToolDefinition {
        name: "get_weather".to_string(),
        description: "Get the weather".to_string(),
        parameters: serde_json::json!({"type": "object"}),
    }];

    let completed = harness.engine.execute(req, CancellationToken::new()).await.unwrap();

    assert_eq!(completed.finish_reason, FinishReason::ToolCalls);
    assert_eq!(completed.message.tool_calls.len(), 1);
    assert_eq!(completed.message.tool_calls[0].name, "get_weather");
    assert_eq!(provider.calls(), 1);

    let run = persisted_run(&harness, &completed.run_id).await;
    assert!(run.tool_calls.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn tool_turn_budget_is_enforced() {
    let looping_turn = ScriptTurn::Respond(vec![
        Chunk::ToolCallDelta(ToolCallDelta {
            index: 0,
            id: Some("call_x".into()),
            name: Some("browser-text".into()),
            arguments: r#"{"url":"file:///x"}"#.into(),
        }),
        Chunk::Finish(FinishReason::ToolCalls),
    ]);
    let provider = ScriptedProvider::new("openai", vec![looping_turn.clone(), looping_turn.clone(), looping_turn]);
    let harness = harness(
        vec![provider.clone()],
        indoc::indoc! {r#"
            [llm]
            tool_turn_budget = 1
        "#},
    );

    let mut req = request("gpt-4o-mini", "loop forever");
    req.hosted_tools = vec!["browser-text".to_string()];

    let error = harness.engine.execute(req, CancellationToken::new()).await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::ToolBudgetExceeded);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn deterministic_requests_hit_the_cache() {
    let provider = ScriptedProvider::new("openai", vec![pong_turn(), pong_turn()]);
    let harness = harness(vec![provider.clone()], "");

    let mut req = request("gpt-4o-mini", "Say PONG");
    req.temperature = Some(0.0);

    let first = harness
        .engine
        .execute(req.clone(), CancellationToken::new())
        .await
        .unwrap();
    let second = harness.engine.execute(req, CancellationToken::new()).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_never_bypasses_the_cache() {
    let provider = ScriptedProvider::new("openai", vec![pong_turn(), pong_turn()]);
    let harness = harness(vec![provider.clone()], "");

    let mut req = request("gpt-4o-mini", "Say PONG");
    req.temperature = Some(0.0);
    req.use_cache = CacheMode::Never;

    harness
        .engine
        .execute(req.clone(), CancellationToken::new())
        .await
        .unwrap();
    let second = harness.engine.execute(req, CancellationToken::new()).await.unwrap();

    assert!(!second.cached);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_persists_a_partial_run_without_feedback_token() {
    let provider = ScriptedProvider::new("openai", vec![pong_turn()]);
    let harness = harness(vec![provider.clone()], "");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = harness
        .engine
        .execute(request("gpt-4o-mini", "Say PONG"), CancellationToken::new().child_token())
        .await
        .map(|_| ())
        .err();
    // A live token completes normally.
    assert!(error.is_none());

    let error = harness
        .engine
        .execute(request("gpt-4o-mini", "Say PONG"), cancel)
        .await
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_delivers_deltas_then_final_accounting() {
    let provider = ScriptedProvider::new(
        "openai",
        vec![ScriptTurn::Respond(vec![
            Chunk::TextDelta("PO".into()),
            Chunk::TextDelta("NG".into()),
            Chunk::Usage(Usage {
                input_tokens: 12,
                output_tokens: 2,
                reasoning_tokens: None,
            }),
            Chunk::Finish(FinishReason::Stop),
        ])],
    );
    let harness = harness(vec![provider], "");

    let mut req = request("gpt-4o-mini", "Say PONG");
    req.stream = true;

    let stream = harness
        .engine
        .execute_stream(req, CancellationToken::new())
        .await
        .unwrap();
    let items: Vec<StreamItem> = stream.collect().await;

    let texts: Vec<&str> = items
        .iter()
        .filter_map(|item| match item {
            StreamItem::TextDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, ["PO", "NG"]);

    let Some(StreamItem::Final(completed)) = items.last() else {
        unreachable!("stream must end with a final frame");
    };
    assert_eq!(completed.message.text_content(), "PONG");
    assert!(completed.feedback_token.is_some());
    assert!(completed.cost_usd > 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_model_is_rejected_up_front() {
    let provider = ScriptedProvider::new("openai", vec![pong_turn()]);
    let harness = harness(vec![provider.clone()], "");

    let error = harness
        .engine
        .execute(request("made-up-model", "hi"), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::UnknownModel);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn tenant_concurrency_cap_rejects_excess_runs() {
    let provider = ScriptedProvider::new("openai", vec![]);
    let harness = harness(
        vec![provider],
        indoc::indoc! {r#"
            [tenants.acme]
            api_key = "k"
            max_concurrent_runs = 0
        "#},
    );

    let error: EngineError = harness
        .engine
        .execute(request("gpt-4o-mini", "hi"), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::RateLimited);
}
