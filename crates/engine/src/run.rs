//! The run state machine.
//!
//! One `RunExecution` drives a single chat completion end to end: prompt
//! assembly, the failover loop over router attempts, streamed relay to the
//! client, the hosted tool loop, accounting, and persistence. Failover only
//! happens while nothing has been delivered to the client; once a delta is
//! out, any failure ends the stream cleanly instead of retracting output.

use std::time::Instant;

use catalog::ModelEntry;
use futures::StreamExt;
use llm::{
    ChatMessage, Chunk, ExecuteContext, FinishReason, MessageContent, ProviderError, ProviderErrorKind,
    ProviderRequest, Role, ToolCall, ToolCallAssembler, ToolDefinition, Usage, token_counter,
};
use router::Attempt;
use store::{Run, RunStatus, ToolCallRecord};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tools::{HostedTool, PendingCall, ToolStatus};
use uuid::Uuid;

use crate::{
    EngineInner,
    assembler::{self, AssembledPrompt},
    cache::{CacheKeyInput, cache_key},
    error::{EngineError, ErrorKind},
    events::RunEvent,
    request::{CompletedRun, RunRequest, StreamItem},
};

/// Depth of the client-facing chunk channel. The provider reader and the
/// client writer share this capacity, which is what gives the pipeline its
/// back-pressure.
pub(crate) const STREAM_CHANNEL_DEPTH: usize = 64;

pub(crate) struct Emitter {
    tx: Option<mpsc::Sender<StreamItem>>,
}

impl Emitter {
    pub(crate) fn streaming(tx: mpsc::Sender<StreamItem>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn buffered() -> Self {
        Self { tx: None }
    }

    async fn send(&self, item: StreamItem) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(item).await;
        }
    }
}

/// Everything decided before the first provider byte: the rendered prompt,
/// the failover plan, and a possible cache hit.
pub(crate) struct Prepared {
    assembled: AssembledPrompt,
    plan: Vec<Attempt>,
    entry: &'static ModelEntry,
    cache_key: Option<String>,
    pub(crate) cache_hit: Option<CompletedRun>,
}

enum AttemptOutcome {
    Success { message: ChatMessage, finish: FinishReason },
    /// Retryable failure with nothing delivered; the next attempt may run.
    Retry(ProviderError),
    Fatal(EngineError),
}

pub(crate) struct RunExecution {
    inner: std::sync::Arc<EngineInner>,
    request: RunRequest,
    cancel: tokio_util::sync::CancellationToken,
    pub(crate) run_id: String,
    started: Instant,
    created_at_ms: i64,
    completions: Vec<Usage>,
    response_messages: Vec<ChatMessage>,
    tool_records: Vec<ToolCallRecord>,
    attempt_errors: Vec<String>,
    delivered_any: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RunExecution {
    pub(crate) fn new(
        inner: std::sync::Arc<EngineInner>,
        request: RunRequest,
        cancel: tokio_util::sync::CancellationToken,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            inner,
            request,
            cancel,
            run_id: format!("run_{}", Uuid::now_v7().simple()),
            started: Instant::now(),
            created_at_ms: jiff::Timestamp::now().as_millisecond(),
            completions: Vec::new(),
            response_messages: Vec::new(),
            tool_records: Vec::new(),
            attempt_errors: Vec::new(),
            delivered_any: false,
            _permit: permit,
        }
    }

    /// Assembly, routing and cache lookup. A failure here persists a failed
    /// run before surfacing, since the run id is already assigned.
    pub(crate) async fn prepare(&mut self) -> Result<Prepared, EngineError> {
        self.inner.events.emit(RunEvent::Started {
            run_id: self.run_id.clone(),
            tenant: self.request.tenant.clone(),
            agent_id: self.request.agent_id(),
            model: self.request.model.clone(),
        });

        let assembled = match assembler::assemble(&self.inner.store, &self.inner.orchestrator, &self.request).await {
            Ok(assembled) => assembled,
            Err(error) => {
                self.persist_failure(&error, None);
                return Err(error);
            }
        };

        let required = catalog::Capabilities {
            streaming: self.request.stream,
            tools: !self.request.client_tools.is_empty() || !assembled.hosted_tools.is_empty(),
            structured_output: self.request.response_schema.is_some(),
            image_input: assembled.messages.iter().any(ChatMessage::has_image),
            audio_input: false,
            reasoning: false,
        };

        let requirements = router::Requirements {
            model: assembled.model.clone(),
            required,
            estimated_input_tokens: token_counter::count_input_tokens(&assembled.messages),
            expected_output_tokens: assembled.max_tokens.unwrap_or(1024) as u64,
            byok_provider: self.request.byok_provider.clone(),
        };

        let tenant_policy = self
            .inner
            .config
            .tenants
            .get(&self.request.tenant)
            .map(router::TenantPolicy::from)
            .unwrap_or_default();

        let plan = match router::plan(
            &requirements,
            &tenant_policy,
            &self.inner.providers,
            &self.inner.catalog,
            &self.inner.health,
            self.inner.config.llm.max_attempts,
        ) {
            Ok(plan) => plan,
            Err(error) => {
                let error = EngineError::from(error);
                self.persist_failure(&error, Some(&assembled));
                return Err(error);
            }
        };

        // The plan validated the model; resolve again for prices and window.
        let entry = match self.inner.catalog.get(&assembled.model) {
            Some(resolved) => resolved.entry,
            None => {
                let error = EngineError::new(ErrorKind::UnknownModel, format!("model '{}' vanished", assembled.model));
                self.persist_failure(&error, Some(&assembled));
                return Err(error);
            }
        };

        log::debug!(
            "assembled prompt for {}: model {}, {} message(s), fingerprint {}",
            self.run_id,
            assembled.model,
            assembled.messages.len(),
            assembled.schema_fingerprint
        );

        let tool_names: Vec<String> = assembled
            .hosted_tools
            .iter()
            .map(|tool| tool.name().to_string())
            .chain(self.request.client_tools.iter().map(|tool| tool.name.clone()))
            .collect();

        let cache_key = cache_key(&CacheKeyInput {
            tenant: &self.request.tenant,
            model: entry.id,
            messages: &assembled.messages,
            temperature: assembled.temperature,
            max_tokens: assembled.max_tokens,
            tool_names: &tool_names,
            response_schema: self.request.response_schema.as_ref(),
            mode: self.request.use_cache,
        });

        let cache_hit = cache_key.as_deref().and_then(|key| self.inner.cache.get(key)).map(|hit| {
            let mut replayed = (*hit).clone();
            replayed.cached = true;
            replayed
        });

        Ok(Prepared {
            assembled,
            plan,
            entry,
            cache_key,
            cache_hit,
        })
    }

    /// The failover loop. Returns the finished run or the terminal error;
    /// either way the run record is on its way to the store when this
    /// returns.
    pub(crate) async fn drive(mut self, prepared: Prepared, emitter: &Emitter) -> Result<CompletedRun, EngineError> {
        let Prepared {
            assembled,
            plan,
            entry,
            cache_key,
            ..
        } = prepared;

        let tools = self.collect_tool_definitions(&assembled);
        let attempts_total = plan.len();

        for (index, attempt) in plan.into_iter().enumerate() {
            let is_last = index + 1 == attempts_total;

            self.inner.events.emit(RunEvent::AttemptStarted {
                run_id: self.run_id.clone(),
                attempt: index,
                provider: attempt.provider.clone(),
                model: attempt.model.clone(),
            });

            let Some(provider) = self.inner.providers.get(&attempt.provider) else {
                self.attempt_errors
                    .push(format!("{}: provider instance disappeared", attempt.provider));
                continue;
            };

            let outcome = self
                .drive_attempt(provider.as_ref(), &attempt, &assembled, entry, &tools, emitter)
                .await;

            match outcome {
                AttemptOutcome::Success { message, finish } => {
                    self.inner.health.record_success(&attempt.provider, &attempt.model);
                    return Ok(self.finalize_success(FinalizeArgs {
                        assembled,
                        message,
                        finish,
                        provider: attempt.provider,
                        entry,
                        attempt_count: index as u32 + 1,
                        cache_key,
                    }));
                }
                AttemptOutcome::Retry(provider_error) => {
                    self.inner.health.record_failure(&attempt.provider, &attempt.model);
                    self.inner.events.emit(RunEvent::AttemptFailed {
                        run_id: self.run_id.clone(),
                        attempt: index,
                        provider: attempt.provider.clone(),
                        model: attempt.model.clone(),
                        error_kind: provider_error.kind.as_str().to_string(),
                        retryable: true,
                    });
                    self.attempt_errors.push(provider_error.to_string());

                    if is_last {
                        let error = EngineError::new(
                            ErrorKind::ProviderUnavailable,
                            format!(
                                "all {attempts_total} attempt(s) failed; last error: {provider_error}"
                            ),
                        )
                        .with_provider(attempt.provider)
                        .with_model(attempt.model);

                        self.persist_failure(&error, Some(&assembled));
                        return Err(error);
                    }
                }
                AttemptOutcome::Fatal(error) => {
                    // Cancellation says nothing about the provider's health.
                    if error.kind != ErrorKind::Cancelled {
                        self.inner.health.record_failure(&attempt.provider, &attempt.model);
                    }
                    self.inner.events.emit(RunEvent::AttemptFailed {
                        run_id: self.run_id.clone(),
                        attempt: index,
                        provider: attempt.provider.clone(),
                        model: attempt.model.clone(),
                        error_kind: error.kind.as_str().to_string(),
                        retryable: false,
                    });
                    self.attempt_errors.push(error.to_string());
                    self.persist_failure(&error, Some(&assembled));
                    return Err(error);
                }
            }
        }

        let error = EngineError::new(ErrorKind::Internal, "no provider attempt could be executed");
        self.persist_failure(&error, Some(&assembled));
        Err(error)
    }

    fn collect_tool_definitions(&self, assembled: &AssembledPrompt) -> Vec<ToolDefinition> {
        assembled
            .hosted_tools
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .chain(self.request.client_tools.iter().cloned())
            .collect()
    }

    async fn drive_attempt(
        &mut self,
        provider: &dyn llm::Provider,
        attempt: &Attempt,
        assembled: &AssembledPrompt,
        entry: &'static ModelEntry,
        tools: &[ToolDefinition],
        emitter: &Emitter,
    ) -> AttemptOutcome {
        let tenant_config = self.inner.config.tenants.get(&self.request.tenant);
        let attempt_timeout = tenant_config
            .and_then(|t| t.attempt_timeout)
            .unwrap_or(self.inner.config.llm.attempt_timeout);
        let idle_timeout = self.inner.config.llm.idle_timeout;
        let budget = self.inner.config.llm.tool_turn_budget;

        let deadline = tokio::time::Instant::now() + attempt_timeout;

        // Deltas are forwarded live only on a pure client-tool run; when
        // hosted tools are registered the calls may be executed here, so the
        // fragments are buffered and only surface if the turn hands control
        // back to the client.
        let forward_tool_deltas = assembled.hosted_tools.is_empty() && !self.request.client_tools.is_empty();

        let api_key_override = match (&self.request.byok_provider, &self.request.byok_key) {
            (Some(byok_provider), Some(key)) if *byok_provider == attempt.provider => Some(key.clone()),
            _ => None,
        };
        let ctx = ExecuteContext {
            cancel: self.cancel.clone(),
            api_key_override,
        };

        let mut conversation = assembled.messages.clone();
        let mut turn = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return AttemptOutcome::Fatal(EngineError::new(ErrorKind::Cancelled, "run cancelled"));
            }

            let provider_request = ProviderRequest {
                model: attempt.model.clone(),
                messages: conversation.clone(),
                temperature: assembled.temperature,
                top_p: assembled.top_p,
                max_tokens: assembled.max_tokens,
                stop: self.request.stop.clone(),
                tools: tools.to_vec(),
                response_schema: self.request.response_schema.clone(),
                stream: self.request.stream,
                context_window: Some(entry.context_window),
            };

            let execute = tokio::time::timeout_at(deadline, provider.execute(provider_request, &ctx));
            let mut stream = match execute.await {
                Err(_) => return self.stream_failure(timeout_error(provider.name(), "attempt budget exhausted")),
                Ok(Err(error)) => return self.stream_failure(error),
                Ok(Ok(stream)) => stream,
            };

            let mut assembler = ToolCallAssembler::default();
            let mut turn_text = String::new();
            let finish;

            loop {
                if self.cancel.is_cancelled() {
                    return AttemptOutcome::Fatal(EngineError::new(ErrorKind::Cancelled, "run cancelled"));
                }

                let read_deadline = deadline.min(tokio::time::Instant::now() + idle_timeout);
                let next = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        return AttemptOutcome::Fatal(EngineError::new(ErrorKind::Cancelled, "run cancelled"));
                    }
                    item = tokio::time::timeout_at(read_deadline, stream.next()) => item,
                };

                let item = match next {
                    Err(_) => {
                        let what = if tokio::time::Instant::now() >= deadline {
                            "attempt budget exhausted"
                        } else {
                            "stream went idle"
                        };
                        return self.stream_failure(timeout_error(provider.name(), what));
                    }
                    Ok(item) => item,
                };

                match item {
                    // Upstream closed without a finish marker; take what
                    // arrived as a complete turn.
                    None => {
                        finish = FinishReason::Stop;
                        break;
                    }
                    Some(Err(error)) => return self.stream_failure(error),
                    Some(Ok(Chunk::TextDelta(text))) => {
                        self.delivered_any = true;
                        self.inner.events.emit(RunEvent::ChunkForwarded {
                            run_id: self.run_id.clone(),
                            bytes: text.len(),
                        });
                        turn_text.push_str(&text);
                        emitter.send(StreamItem::TextDelta(text)).await;
                    }
                    Some(Ok(Chunk::ToolCallDelta(delta))) => {
                        if forward_tool_deltas {
                            self.delivered_any = true;
                            emitter.send(StreamItem::ToolCallDelta(delta.clone())).await;
                        }
                        assembler.push(&delta);
                    }
                    Some(Ok(Chunk::Usage(usage))) => self.completions.push(usage),
                    Some(Ok(Chunk::Finish(reason))) => {
                        finish = reason;
                        break;
                    }
                }
            }

            if finish != FinishReason::ToolCalls {
                return AttemptOutcome::Success {
                    message: ChatMessage::assistant(turn_text),
                    finish,
                };
            }

            let calls = assembler.finish();
            if calls.is_empty() {
                return AttemptOutcome::Success {
                    message: ChatMessage::assistant(turn_text),
                    finish: FinishReason::Stop,
                };
            }

            let all_hosted = calls
                .iter()
                .all(|call| self.hosted_tool_for(assembled, &call.name).is_some());

            if !all_hosted {
                // At least one call belongs to the client: the turn ends and
                // the caller is expected to come back with tool results.
                if !forward_tool_deltas {
                    for (index, call) in calls.iter().enumerate() {
                        emitter
                            .send(StreamItem::ToolCallDelta(llm::ToolCallDelta {
                                index,
                                id: Some(call.id.clone()),
                                name: Some(call.name.clone()),
                                arguments: call.arguments.clone(),
                            }))
                            .await;
                    }
                }

                let message = ChatMessage {
                    role: Role::Assistant,
                    content: MessageContent::Text(turn_text),
                    tool_calls: calls,
                    tool_call_id: None,
                };
                return AttemptOutcome::Success {
                    message,
                    finish: FinishReason::ToolCalls,
                };
            }

            if turn >= budget {
                return AttemptOutcome::Fatal(EngineError::new(
                    ErrorKind::ToolBudgetExceeded,
                    format!("tool loop exceeded its budget of {budget} turn(s)"),
                ));
            }

            match self.run_hosted_tools(assembled, turn_text, calls).await {
                Ok(messages) => conversation.extend(messages),
                Err(error) => return AttemptOutcome::Fatal(error),
            }

            turn += 1;
        }
    }

    fn hosted_tool_for(&self, assembled: &AssembledPrompt, name: &str) -> Option<HostedTool> {
        let tool = HostedTool::from_name(name)?;
        assembled.hosted_tools.contains(&tool).then_some(tool)
    }

    /// Execute one batch of hosted tool calls and return the messages to
    /// append: the assistant turn that requested them, then one tool result
    /// per call in first-appearance order.
    async fn run_hosted_tools(
        &mut self,
        assembled: &AssembledPrompt,
        turn_text: String,
        calls: Vec<ToolCall>,
    ) -> Result<Vec<ChatMessage>, EngineError> {
        let assistant = ChatMessage {
            role: Role::Assistant,
            content: MessageContent::Text(turn_text),
            tool_calls: calls.clone(),
            tool_call_id: None,
        };
        self.response_messages.push(assistant.clone());

        let mut pending = Vec::with_capacity(calls.len());
        for call in &calls {
            let Some(tool) = self.hosted_tool_for(assembled, &call.name) else {
                continue;
            };

            self.inner.events.emit(RunEvent::ToolCalled {
                run_id: self.run_id.clone(),
                tool: call.name.clone(),
                call_id: call.id.clone(),
            });

            pending.push(PendingCall {
                id: call.id.clone(),
                tool,
                arguments: serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null),
            });
        }

        let started_at_ms = jiff::Timestamp::now().as_millisecond();
        let completed = self.inner.orchestrator.invoke_batch(pending, &self.cancel).await;

        if self.cancel.is_cancelled() {
            return Err(EngineError::new(ErrorKind::Cancelled, "run cancelled"));
        }

        let mut messages = vec![assistant];
        for (call, outcome) in calls.iter().zip(completed) {
            self.inner.events.emit(RunEvent::ToolReturned {
                run_id: self.run_id.clone(),
                tool: outcome.tool.name().to_string(),
                call_id: outcome.id.clone(),
                status: match outcome.status {
                    ToolStatus::Success => "success".to_string(),
                    ToolStatus::Error => "error".to_string(),
                },
                duration_ms: outcome.duration.as_millis() as u64,
            });

            self.tool_records.push(ToolCallRecord {
                name: outcome.tool.name().to_string(),
                arguments: serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null),
                result: outcome.result.clone(),
                status: match outcome.status {
                    ToolStatus::Success => "success".to_string(),
                    ToolStatus::Error => "error".to_string(),
                },
                started_at_ms,
                duration_ms: outcome.duration.as_millis() as u64,
            });

            let result_text = outcome.result.to_string();
            let message = ChatMessage::tool_result(outcome.id, result_text);
            self.response_messages.push(message.clone());
            messages.push(message);
        }

        Ok(messages)
    }

    /// Classify a provider failure mid-attempt: retryable failures may move
    /// to the next attempt, but only while nothing has reached the client.
    fn stream_failure(&self, error: ProviderError) -> AttemptOutcome {
        if router::is_retryable(error.kind) && !self.delivered_any {
            AttemptOutcome::Retry(error)
        } else {
            AttemptOutcome::Fatal(EngineError::from_terminal_provider_error(&error))
        }
    }

    fn finalize_success(&mut self, args: FinalizeArgs) -> CompletedRun {
        let FinalizeArgs {
            assembled,
            message,
            finish,
            provider,
            entry,
            attempt_count,
            cache_key,
        } = args;

        let usage = self.total_usage();
        let cost_usd: f64 = self
            .completions
            .iter()
            .map(|completion| entry.cost(completion.input_tokens, completion.output_tokens))
            .sum();

        let duration = self.started.elapsed();
        let feedback_token = self.inner.signer.sign(&self.run_id);

        self.response_messages.push(message.clone());

        let run = Run {
            id: self.run_id.clone(),
            tenant: self.request.tenant.clone(),
            agent_id: assembled.agent_id.clone(),
            version_id: assembled.version_id.clone(),
            schema_id: assembled.schema_id,
            model: entry.id.to_string(),
            provider: provider.clone(),
            status: RunStatus::Success,
            error_kind: None,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            cost_usd,
            duration_ms: duration.as_millis() as u64,
            context_window_usage_percent: context_window_usage_percent(&usage, entry.context_window),
            attempt_count,
            attempt_errors: std::mem::take(&mut self.attempt_errors),
            created_at_ms: self.created_at_ms,
            metadata: self.request.metadata.clone(),
            feedback_token: Some(feedback_token.clone()),
            request_messages: assembled.messages,
            response_messages: std::mem::take(&mut self.response_messages),
            tool_calls: std::mem::take(&mut self.tool_records),
        };

        self.inner.events.emit(RunEvent::Finished {
            run_id: self.run_id.clone(),
            status: RunStatus::Success.as_str().to_string(),
            cost_usd,
            duration_ms: run.duration_ms,
        });
        self.inner.persist.enqueue(run);

        let completed = CompletedRun {
            run_id: self.run_id.clone(),
            message,
            finish_reason: finish,
            model: entry.id.to_string(),
            provider,
            usage,
            cost_usd,
            duration_seconds: duration.as_secs_f64(),
            feedback_token: Some(feedback_token),
            cached: false,
        };

        if let Some(key) = cache_key {
            self.inner.cache.insert(key, completed.clone());
        }

        completed
    }

    /// Persist a failed or cancelled run. Cancelled runs keep the partial
    /// output already accumulated and never get a feedback token.
    pub(crate) fn persist_failure(&mut self, error: &EngineError, assembled: Option<&AssembledPrompt>) {
        let status = if error.kind == ErrorKind::Cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        };

        let usage = self.total_usage();
        let (entry, model_id) = match assembled.and_then(|a| self.inner.catalog.get(&a.model)) {
            Some(resolved) => (Some(resolved.entry), resolved.entry.id.to_string()),
            None => (None, self.request.model.clone()),
        };

        let cost_usd: f64 = entry
            .map(|entry| {
                self.completions
                    .iter()
                    .map(|completion| entry.cost(completion.input_tokens, completion.output_tokens))
                    .sum()
            })
            .unwrap_or(0.0);

        let run = Run {
            id: self.run_id.clone(),
            tenant: self.request.tenant.clone(),
            agent_id: assembled.map(|a| a.agent_id.clone()).unwrap_or_else(|| self.request.agent_id()),
            version_id: assembled.and_then(|a| a.version_id.clone()),
            schema_id: assembled.and_then(|a| a.schema_id),
            model: model_id,
            provider: error.provider.clone().unwrap_or_default(),
            status,
            error_kind: Some(error.kind.as_str().to_string()),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            cost_usd,
            duration_ms: self.started.elapsed().as_millis() as u64,
            context_window_usage_percent: entry
                .map(|entry| context_window_usage_percent(&usage, entry.context_window))
                .unwrap_or(0),
            attempt_count: self.attempt_errors.len() as u32,
            attempt_errors: std::mem::take(&mut self.attempt_errors),
            created_at_ms: self.created_at_ms,
            metadata: self.request.metadata.clone(),
            feedback_token: None,
            request_messages: assembled
                .map(|a| a.messages.clone())
                .unwrap_or_else(|| self.request.messages.clone()),
            response_messages: std::mem::take(&mut self.response_messages),
            tool_calls: std::mem::take(&mut self.tool_records),
        };

        self.inner.events.emit(RunEvent::Finished {
            run_id: self.run_id.clone(),
            status: status.as_str().to_string(),
            cost_usd,
            duration_ms: run.duration_ms,
        });
        self.inner.persist.enqueue(run);
    }

    fn total_usage(&self) -> Usage {
        let mut total = Usage::default();
        for completion in &self.completions {
            total.input_tokens += completion.input_tokens;
            total.output_tokens += completion.output_tokens;
            if let Some(reasoning) = completion.reasoning_tokens {
                *total.reasoning_tokens.get_or_insert(0) += reasoning;
            }
        }
        total
    }
}

struct FinalizeArgs {
    assembled: AssembledPrompt,
    message: ChatMessage,
    finish: FinishReason,
    provider: String,
    entry: &'static ModelEntry,
    attempt_count: u32,
    cache_key: Option<String>,
}

fn timeout_error(provider: &str, what: &str) -> ProviderError {
    ProviderError::new(ProviderErrorKind::Timeout, provider, what)
}

/// `min(100, ⌊(input + output) · 100 / window⌋)`, or zero when the window is
/// unknown or empty.
pub(crate) fn context_window_usage_percent(usage: &Usage, window: u32) -> u8 {
    if window == 0 {
        return 0;
    }

    let used = usage.input_tokens.saturating_add(usage.output_tokens);
    ((used * 100) / window as u64).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_window_percent_formula() {
        let usage = Usage {
            input_tokens: 600,
            output_tokens: 400,
            reasoning_tokens: None,
        };

        assert_eq!(context_window_usage_percent(&usage, 100_000), 1);
        assert_eq!(context_window_usage_percent(&usage, 1_000), 100);
        assert_eq!(context_window_usage_percent(&usage, 500), 100);
        assert_eq!(context_window_usage_percent(&usage, 0), 0);

        let empty = Usage::default();
        assert_eq!(context_window_usage_percent(&empty, 100_000), 0);
    }

    #[test]
    fn percent_truncates_instead_of_rounding() {
        let usage = Usage {
            input_tokens: 1_999,
            output_tokens: 0,
            reasoning_tokens: None,
        };

        // 1999 / 100000 = 1.999% floors to 1.
        assert_eq!(context_window_usage_percent(&usage, 100_000), 1);
    }
}
