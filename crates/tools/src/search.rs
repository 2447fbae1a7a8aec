//! Google Custom Search backed `web-search` tool.

use config::ToolsConfig;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::required_str;

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

pub(crate) async fn run(http: &Client, config: &ToolsConfig, arguments: &Value) -> Result<Value, String> {
    let query = required_str(arguments, "query")?;

    let api_key = config
        .search_api_key
        .as_ref()
        .ok_or("search API key not configured")?;
    let engine_id = config
        .search_engine_id
        .as_deref()
        .ok_or("search engine id not configured")?;

    let response = http
        .get(SEARCH_URL)
        .query(&[
            ("key", api_key.expose_secret()),
            ("cx", engine_id),
            ("q", query),
            ("num", "8"),
        ])
        .send()
        .await
        .map_err(|e| format!("search request failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log::debug!("search API error ({status}): {body}");
        return Err(format!("search API returned status {status}"));
    }

    let parsed: SearchResponse = response
        .json()
        .await
        .map_err(|e| format!("failed to parse search response: {e}"))?;

    let results: Vec<Value> = parsed
        .items
        .into_iter()
        .map(|item| {
            json!({
                "title": item.title,
                "url": item.link,
                "snippet": item.snippet,
            })
        })
        .collect();

    Ok(Value::Array(results))
}
