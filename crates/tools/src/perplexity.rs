//! Perplexity Sonar backed question-answering tools.

use config::ToolsConfig;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::required_str;

const PERPLEXITY_URL: &str = "https://api.perplexity.ai/chat/completions";

#[derive(Deserialize)]
struct PerplexityResponse {
    #[serde(default)]
    choices: Vec<PerplexityChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct PerplexityChoice {
    message: PerplexityMessage,
}

#[derive(Deserialize)]
struct PerplexityMessage {
    #[serde(default)]
    content: String,
}

pub(crate) async fn run(http: &Client, config: &ToolsConfig, model: &str, arguments: &Value) -> Result<Value, String> {
    let query = required_str(arguments, "query")?;

    let api_key = config
        .perplexity_api_key
        .as_ref()
        .ok_or("perplexity API key not configured")?;

    let body = json!({
        "model": model,
        "messages": [{ "role": "user", "content": query }],
    });

    let response = http
        .post(PERPLEXITY_URL)
        .header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()))
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("perplexity request failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log::debug!("perplexity API error ({status}): {body}");
        return Err(format!("perplexity API returned status {status}"));
    }

    let parsed: PerplexityResponse = response
        .json()
        .await
        .map_err(|e| format!("failed to parse perplexity response: {e}"))?;

    let answer = parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .unwrap_or_default();

    Ok(json!({
        "answer": answer,
        "citations": parsed.citations,
    }))
}
