//! Prompt assembly.
//!
//! Turns the caller's request into a fully materialized prompt: deployment
//! aliases resolve to stored versions, prior-run history is prepended for
//! replies, message text renders through the template engine against the
//! input map, and `@tool` references in system messages register hosted
//! tools for the run.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
};

use llm::ChatMessage;
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use store::{Environment, RunStore, Version};
use template::Template;
use tools::{HostedTool, ToolOrchestrator};

use crate::{
    error::{EngineError, ErrorKind},
    request::RunRequest,
};

/// The assembled, render-complete prompt for one run.
#[derive(Debug, Clone)]
pub(crate) struct AssembledPrompt {
    pub agent_id: String,
    pub messages: Vec<ChatMessage>,
    /// Concrete model id (still subject to catalog deprecation hops).
    pub model: String,
    pub version_id: Option<String>,
    pub schema_id: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub hosted_tools: Vec<HostedTool>,
    pub schema_fingerprint: String,
}

/// Parse a deployment alias of the form `agent/#schema/environment`.
pub(crate) fn parse_deployment_alias(model: &str) -> Option<(String, u32, Environment)> {
    let (agent, rest) = model.split_once("/#")?;
    let (schema, environment) = rest.split_once('/')?;

    if agent.is_empty() {
        return None;
    }

    let schema_id = schema.parse::<u32>().ok()?;
    let environment = environment.parse::<Environment>().ok()?;

    Some((agent.to_string(), schema_id, environment))
}

pub(crate) async fn assemble(
    store: &RunStore,
    orchestrator: &ToolOrchestrator,
    request: &RunRequest,
) -> Result<AssembledPrompt, EngineError> {
    let mut agent_id = request.agent_id();
    let mut version: Option<Version> = None;

    if let Some((agent, schema_id, environment)) = parse_deployment_alias(&request.model) {
        let Some(resolved) = store.resolve_deployment(&request.tenant, &agent, schema_id, environment) else {
            return Err(EngineError::new(
                ErrorKind::UnknownDeployment,
                format!(
                    "no deployment of agent '{agent}' schema #{schema_id} in {}",
                    environment.as_str()
                ),
            ));
        };

        agent_id = agent;
        version = Some(resolved);
    }

    // Replies pull the prior exchange in front of the new messages. The
    // stored template is not re-applied on this path; the prior run already
    // carries its rendered form.
    let history = match &request.reply_to_run_id {
        Some(run_id) => {
            let run = store
                .get_run(&request.tenant, run_id)
                .await
                .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?
                .ok_or_else(|| {
                    EngineError::new(
                        ErrorKind::InvalidRequest,
                        format!("reply_to_run_id '{run_id}' does not name a run of this tenant"),
                    )
                })?;

            let mut messages = run.request_messages;
            messages.extend(run.response_messages);
            Some(messages)
        }
        None => None,
    };

    let current = match (&version, &history) {
        // The stored prompt takes over; the caller steers through `input`.
        (Some(version), None) => version.messages.clone(),
        _ => request.messages.clone(),
    };

    if current.is_empty() && history.is_none() {
        return Err(EngineError::new(
            ErrorKind::InvalidRequest,
            "messages must not be empty without a deployment alias",
        ));
    }

    let (rendered, referenced_keys) = render_messages(current, &request.input)?;

    // Hosted tools: `@name` references in system messages, the explicit
    // request list, and the version's declared set.
    let mut hosted: Vec<HostedTool> = Vec::new();
    let mut register = |tool: HostedTool| {
        if !hosted.contains(&tool) {
            hosted.push(tool);
        }
    };

    let mut expanded = Vec::with_capacity(rendered.len());
    for message in rendered {
        if message.role == llm::Role::System {
            let (message, found) = expand_tool_references(message);
            found.into_iter().for_each(&mut register);
            expanded.push(message);
        } else {
            expanded.push(message);
        }
    }

    let declared = request
        .hosted_tools
        .iter()
        .chain(version.iter().flat_map(|v| v.tools.iter()));
    for name in declared {
        match HostedTool::from_name(name) {
            Some(tool) => register(tool),
            None => log::warn!("ignoring unknown hosted tool '{name}'"),
        }
    }

    hosted.retain(|tool| {
        let enabled = orchestrator.is_enabled(*tool);
        if !enabled {
            log::warn!("hosted tool '{}' is not enabled on this deployment", tool.name());
        }
        enabled
    });

    let mut messages = history.unwrap_or_default();
    messages.extend(expanded);

    let schema_fingerprint = fingerprint(&referenced_keys, request.response_schema.as_ref());

    Ok(AssembledPrompt {
        agent_id,
        messages,
        model: version
            .as_ref()
            .map(|v| v.model.clone())
            .unwrap_or_else(|| request.model.clone()),
        version_id: version.as_ref().map(|v| v.version_id.clone()),
        schema_id: version.as_ref().map(|v| v.schema_id),
        temperature: request.temperature.or(version.as_ref().and_then(|v| v.temperature)),
        top_p: request.top_p.or(version.as_ref().and_then(|v| v.top_p)),
        max_tokens: request.max_tokens.or(version.as_ref().and_then(|v| v.max_tokens)),
        hosted_tools: hosted,
        schema_fingerprint,
    })
}

/// Render every text fragment through the template engine, collecting the
/// union of referenced root variables and failing on required ones that the
/// input map does not provide.
fn render_messages(
    messages: Vec<ChatMessage>,
    input: &BTreeMap<String, Value>,
) -> Result<(Vec<ChatMessage>, BTreeSet<String>), EngineError> {
    let mut referenced = BTreeSet::new();
    let mut missing = BTreeSet::new();
    let mut rendered = Vec::with_capacity(messages.len());

    for message in messages {
        let message = message.map_text(|text| -> Result<String, EngineError> {
            let parsed = Template::parse(text)?;

            for (name, usage) in parsed.referenced_inputs() {
                if usage.required && !input.contains_key(&name) {
                    missing.insert(name.clone());
                }
                referenced.insert(name);
            }

            Ok(parsed.render(input)?)
        })?;

        rendered.push(message);
    }

    if !missing.is_empty() {
        let names = missing.into_iter().collect::<Vec<_>>().join(", ");
        return Err(EngineError::new(
            ErrorKind::MissingInput,
            format!("missing template input(s): {names}"),
        ));
    }

    Ok((rendered, referenced))
}

/// Replace `@tool-name` tokens in a system message with descriptive text and
/// return the tools that were referenced.
fn expand_tool_references(message: ChatMessage) -> (ChatMessage, Vec<HostedTool>) {
    let mut found = Vec::new();

    let message = message
        .map_text(|text| -> Result<String, std::convert::Infallible> {
            let mut out = String::with_capacity(text.len());
            let mut rest = text;

            while let Some(at) = rest.find('@') {
                out.push_str(&rest[..at]);
                let tail = &rest[at + 1..];

                let end = tail
                    .find(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'))
                    .unwrap_or(tail.len());

                match HostedTool::from_name(&tail[..end]) {
                    Some(tool) => {
                        let _ = write!(out, "the `{}` tool ({})", tool.name(), tool.description());
                        if !found.contains(&tool) {
                            found.push(tool);
                        }
                        rest = &tail[end..];
                    }
                    None => {
                        out.push('@');
                        rest = tail;
                    }
                }
            }

            out.push_str(rest);
            Ok(out)
        })
        .unwrap_or_else(|never| match never {});

    (message, found)
}

/// Fingerprint of the version contract: the sorted referenced input keys
/// plus the canonical output schema.
pub(crate) fn fingerprint(referenced_keys: &BTreeSet<String>, output_schema: Option<&Value>) -> String {
    let mut hasher = Sha256::new();

    for key in referenced_keys {
        hasher.update(key.as_bytes());
        hasher.update([0]);
    }
    if let Some(schema) = output_schema {
        hasher.update(schema.to_string().as_bytes());
    }

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }

    out
}
