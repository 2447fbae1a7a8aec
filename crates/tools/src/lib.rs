//! Server-executed tools.
//!
//! The orchestrator owns the built-in tool set (web search, Perplexity
//! variants, browser fetch) and runs model-requested invocations with
//! bounded concurrency and per-call timeouts. A tool failure never fails the
//! run it belongs to: the error is folded into the tool result payload so
//! the model can read it and recover.

mod browser;
mod perplexity;
mod search;

use std::time::{Duration, Instant};

use config::ToolsConfig;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// The built-in tool set. Client-defined function tools never reach this
/// enum; they stream back to the caller unexecuted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostedTool {
    WebSearch,
    PerplexitySonar,
    PerplexitySonarPro,
    PerplexitySonarReasoning,
    BrowserText,
}

impl HostedTool {
    pub const ALL: [HostedTool; 5] = [
        HostedTool::WebSearch,
        HostedTool::PerplexitySonar,
        HostedTool::PerplexitySonarPro,
        HostedTool::PerplexitySonarReasoning,
        HostedTool::BrowserText,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HostedTool::WebSearch => "web-search",
            HostedTool::PerplexitySonar => "perplexity-sonar",
            HostedTool::PerplexitySonarPro => "perplexity-sonar-pro",
            HostedTool::PerplexitySonarReasoning => "perplexity-sonar-reasoning",
            HostedTool::BrowserText => "browser-text",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            HostedTool::WebSearch => "Search the web and return result titles, URLs and snippets.",
            HostedTool::PerplexitySonar => "Ask Perplexity Sonar for a sourced answer to a question.",
            HostedTool::PerplexitySonarPro => "Ask Perplexity Sonar Pro for a deeply sourced answer to a question.",
            HostedTool::PerplexitySonarReasoning => {
                "Ask Perplexity Sonar Reasoning for a step-by-step sourced answer."
            }
            HostedTool::BrowserText => "Fetch a URL and return its readable text content. No images, no interaction.",
        }
    }

    /// JSON schema of the tool's arguments object.
    pub fn parameters(&self) -> Value {
        match self {
            HostedTool::WebSearch
            | HostedTool::PerplexitySonar
            | HostedTool::PerplexitySonarPro
            | HostedTool::PerplexitySonarReasoning => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query or question." }
                },
                "required": ["query"]
            }),
            HostedTool::BrowserText => json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The URL to fetch." }
                },
                "required": ["url"]
            }),
        }
    }
}

/// Wire-ready description of a hosted tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One invocation the model asked for.
#[derive(Debug, Clone)]
pub struct PendingCall {
    /// The provider's tool call id; echoed back so the result can be matched.
    pub id: String,
    pub tool: HostedTool,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// The outcome of one invocation, successful or not.
#[derive(Debug, Clone)]
pub struct CompletedCall {
    pub id: String,
    pub tool: HostedTool,
    pub status: ToolStatus,
    /// The tool's output on success, or `{"error": "…"}` on failure.
    pub result: Value,
    pub duration: Duration,
}

/// Executes hosted tool calls against their backing services.
pub struct ToolOrchestrator {
    http: Client,
    config: ToolsConfig,
}

impl ToolOrchestrator {
    pub fn new(config: ToolsConfig) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(config.browser_user_agent.clone())
            .build()
            .expect("failed to build tool HTTP client");

        Self { http, config }
    }

    /// Tools usable with the current credentials.
    pub fn available(&self) -> Vec<HostedTool> {
        HostedTool::ALL
            .into_iter()
            .filter(|tool| self.is_enabled(*tool))
            .collect()
    }

    pub fn is_enabled(&self, tool: HostedTool) -> bool {
        match tool {
            HostedTool::WebSearch => {
                self.config.search_api_key.is_some() && self.config.search_engine_id.is_some()
            }
            HostedTool::PerplexitySonar | HostedTool::PerplexitySonarPro | HostedTool::PerplexitySonarReasoning => {
                self.config.perplexity_api_key.is_some()
            }
            HostedTool::BrowserText => true,
        }
    }

    /// Descriptors for every available tool, for prompt injection and the
    /// hosted tools listing.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.available()
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Run one tool call under the per-call timeout and the run's
    /// cancellation signal. Failures become error payloads, never `Err`.
    pub async fn invoke(&self, call: PendingCall, cancel: &CancellationToken) -> CompletedCall {
        let started = Instant::now();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err("tool execution cancelled".to_string()),
            result = tokio::time::timeout(self.config.timeout, self.dispatch(call.tool, &call.arguments)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(format!(
                        "tool timed out after {}s",
                        self.config.timeout.as_secs()
                    )),
                }
            }
        };

        let duration = started.elapsed();

        match outcome {
            Ok(result) => CompletedCall {
                id: call.id,
                tool: call.tool,
                status: ToolStatus::Success,
                result,
                duration,
            },
            Err(message) => {
                log::warn!("tool '{}' failed: {message}", call.tool.name());
                CompletedCall {
                    id: call.id,
                    tool: call.tool,
                    status: ToolStatus::Error,
                    result: json!({ "error": message }),
                    duration,
                }
            }
        }
    }

    /// Run a batch of calls with bounded parallelism. Results come back in
    /// the order the calls were given, regardless of completion order.
    pub async fn invoke_batch(&self, calls: Vec<PendingCall>, cancel: &CancellationToken) -> Vec<CompletedCall> {
        let concurrency = self.config.max_concurrent.max(1);

        futures::stream::iter(calls)
            .map(|call| self.invoke(call, cancel))
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn dispatch(&self, tool: HostedTool, arguments: &Value) -> Result<Value, String> {
        if !self.is_enabled(tool) {
            return Err(format!("tool '{}' is not enabled on this deployment", tool.name()));
        }

        match tool {
            HostedTool::WebSearch => search::run(&self.http, &self.config, arguments).await,
            HostedTool::PerplexitySonar => perplexity::run(&self.http, &self.config, "sonar", arguments).await,
            HostedTool::PerplexitySonarPro => perplexity::run(&self.http, &self.config, "sonar-pro", arguments).await,
            HostedTool::PerplexitySonarReasoning => {
                perplexity::run(&self.http, &self.config, "sonar-reasoning", arguments).await
            }
            HostedTool::BrowserText => browser::run(&self.http, arguments).await,
        }
    }
}

pub(crate) fn required_str<'a>(arguments: &'a Value, field: &str) -> Result<&'a str, String> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("missing required argument '{field}'"))
}
