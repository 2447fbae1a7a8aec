//! Plain-text URL fetcher.
//!
//! Fetches a page and reduces it to readable text. No rendering, no
//! scripting, no follow-up interaction; binary content types are refused.

use reqwest::Client;
use serde_json::{Value, json};

use crate::required_str;

/// Upper bound on fetched body size. Pages past this are truncated rather
/// than ballooning the conversation.
const MAX_TEXT_BYTES: usize = 512 * 1024;

const RENDER_WIDTH: usize = 100;

pub(crate) async fn run(http: &Client, arguments: &Value) -> Result<Value, String> {
    let url = required_str(arguments, "url")?;

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(format!("unsupported URL scheme in '{url}'"));
    }

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| format!("fetch failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("fetch returned status {status}"));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("text/html")
        .to_string();

    let body = response.bytes().await.map_err(|e| format!("failed to read body: {e}"))?;
    let body = &body[..body.len().min(MAX_TEXT_BYTES)];

    let text = if content_type.starts_with("text/html") || content_type.starts_with("application/xhtml") {
        html2text::from_read(body, RENDER_WIDTH)
    } else if content_type.starts_with("text/") || content_type.contains("json") {
        String::from_utf8_lossy(body).into_owned()
    } else {
        return Err(format!("unsupported content type '{content_type}'"));
    };

    Ok(json!({ "text": text.trim() }))
}
