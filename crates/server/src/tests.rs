//! Router-level tests.
//!
//! These exercise every endpoint that does not need a live provider: the
//! catalog, hosted tools, version/deployment management, run lookup, search
//! and the feedback flow.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn test_router(dir: &tempfile::TempDir, tenants: &str) -> Router {
    let config_str = format!(
        indoc::indoc! {r#"
            [store]
            path = "{path}"

            [signing]
            secret = "server-test-secret"

            [providers.openai]
            type = "openai"
            api_key = "sk-test"

            {tenants}
        "#},
        path = dir.path().display(),
        tenants = tenants,
    );

    let config: config::Config = toml::from_str(&config_str).unwrap();
    crate::router(config).await.unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn models_listing_includes_pricing_and_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["object"], json!("list"));

    let models = body["data"].as_array().unwrap();
    assert!(!models.is_empty());

    let mini = models.iter().find(|m| m["id"] == json!("gpt-4o-mini")).unwrap();
    assert!(mini["input_price_per_million"].as_f64().unwrap() > 0.0);
    assert_eq!(mini["capabilities"]["streaming"], json!(true));

    // Deprecated entries stay listed, with their replacement.
    let deprecated = models.iter().find(|m| m["id"] == json!("gpt-3.5-turbo")).unwrap();
    assert_eq!(deprecated["replaced_by"], json!("gpt-4o-mini"));
}

#[tokio::test(flavor = "multi_thread")]
async fn hosted_tools_listing_is_open_and_reflects_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(Request::get("/v1/tools/hosted").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();

    // Only browser-text works without search or Perplexity credentials.
    assert_eq!(names, ["browser-text"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_endpoint_reports_persistence_counters() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["persist_dropped"], json!(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn version_create_then_deploy_flow() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/acme/agents/translator/schemas/1/versions",
            json!({
                "messages": [{"role": "system", "content": "Translate to French: {{ text }}"}],
                "model": "gpt-4o-mini",
                "temperature": 0.0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let version = body_json(response).await;
    assert_eq!(version["version_id"], json!("v1"));
    assert_eq!(version["schema_id"], json!(1));
    assert!(!version["schema_fingerprint"].as_str().unwrap().is_empty());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/acme/agents/translator/versions/v1/deploy",
            json!({"environment": "production"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let deployed = body_json(response).await;
    assert_eq!(deployed["version_id"], json!("v1"));
    assert_eq!(deployed["environment"], json!("production"));
}

#[tokio::test(flavor = "multi_thread")]
async fn version_with_unknown_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/acme/agents/translator/schemas/1/versions",
            json!({
                "messages": [{"role": "system", "content": "hi"}],
                "model": "made-up"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], json!("unknown_model"));
}

#[tokio::test(flavor = "multi_thread")]
async fn deploying_an_unknown_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/acme/agents/translator/versions/v9/deploy",
            json!({"environment": "staging"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], json!("invalid_request"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_run_lookup_is_a_request_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(
            Request::get("/v1/acme/agents/support/runs/run_missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn search_accepts_a_bare_query_array() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/acme/agents/support/runs/search",
            json!([{"field": "model", "op": "=", "value": "gpt-4o-mini"}]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(0));
    assert_eq!(body["items"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn tenant_endpoints_require_the_matching_key() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(
        &dir,
        indoc::indoc! {r#"
            [tenants.acme]
            api_key = "relay-acme-key"
        "#},
    )
    .await;

    // No credentials.
    let response = app
        .clone()
        .oneshot(json_request("POST", "/v1/acme/agents/a/runs/search", json!([])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Right key, wrong tenant path.
    let mut request = json_request("POST", "/v1/globex/agents/a/runs/search", json!([]));
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer relay-acme-key".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Right key, right tenant.
    let mut request = json_request("POST", "/v1/acme/agents/a/runs/search", json!([]));
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer relay-acme-key".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn feedback_round_trip_and_replacement() {
    let dir = tempfile::tempdir().unwrap();

    let config_str = format!(
        indoc::indoc! {r#"
            [store]
            path = "{path}"

            [signing]
            secret = "server-test-secret"

            [providers.openai]
            type = "openai"
            api_key = "sk-test"
        "#},
        path = dir.path().display(),
    );
    let config: config::Config = toml::from_str(&config_str).unwrap();

    // Mint a token out-of-band with the same secret the server uses.
    let signer = feedback_token::FeedbackTokenSigner::new(
        &secrecy::SecretString::from("server-test-secret".to_string()),
        std::time::Duration::from_secs(3600),
    );
    let token = signer.sign("run_abc");

    let app = crate::router(config).await.unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/feedback",
            json!({"feedback_token": token.clone(), "outcome": "positive", "user_id": "u1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["run_id"], json!("run_abc"));
    assert_eq!(body["recorded"], json!(true));

    // Same (run, user) replaces the previous outcome.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/feedback",
            json!({"feedback_token": token.clone(), "outcome": "negative", "user_id": "u1", "comment": "worse"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Garbage tokens are rejected and record nothing.
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/feedback",
            json!({"feedback_token": "garbage", "outcome": "positive"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_with_unknown_model_returns_the_error_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/chat/completions",
            json!({"model": "made-up-model", "messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], json!("unknown_model"));
    assert!(body["error"]["request_id"].as_str().unwrap().starts_with("req_"));
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_with_empty_messages_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(&dir, "").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/chat/completions",
            json!({"model": "gpt-4o-mini", "messages": []}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], json!("invalid_request"));
}
