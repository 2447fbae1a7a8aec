//! Relay HTTP server.
//!
//! Maps the external wire protocol onto the run engine and exposes the run,
//! search and feedback endpoints. Provides a reusable [`serve`] function
//! used by both the binary and the tests.

mod auth;
mod error;
mod handlers;
mod openai;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use config::Config;
use engine::Engine;
use feedback_token::FeedbackTokenSigner;
use llm::ProviderSet;
use store::RunStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tools::ToolOrchestrator;
use tower_http::cors::CorsLayer;

use crate::handlers::AppState;

/// Configuration for serving Relay.
pub struct ServeConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,
    /// The deserialized relay.toml configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Version string logged on startup.
    pub version: String,
    /// Optional sender for the bound address (useful with port 0).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Build the full application router from configuration.
pub async fn router(config: Config) -> anyhow::Result<Router> {
    config.validate()?;

    let providers = ProviderSet::from_config(&config);
    let store = RunStore::open(&config.store)?;

    let secret = config
        .signing
        .secret
        .clone()
        .ok_or_else(|| anyhow::anyhow!("token_signing_secret is required"))?;
    let signer = FeedbackTokenSigner::new(&secret, config.signing.token_ttl);
    let orchestrator = ToolOrchestrator::new(config.tools.clone());

    let engine = Engine::new(config.clone(), providers, orchestrator, store, signer);

    let state = AppState {
        engine,
        config: Arc::new(config),
    };

    let health_path = state.config.server.health_path.clone();

    Ok(Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/tools/hosted", get(handlers::hosted_tools))
        .route("/v1/feedback", post(handlers::post_feedback))
        .route(
            "/v1/{tenant}/agents/{agent_id}/schemas/{schema_id}/versions",
            post(handlers::create_version),
        )
        .route(
            "/v1/{tenant}/agents/{agent_id}/versions/{version_id}/deploy",
            post(handlers::deploy_version),
        )
        .route("/v1/{tenant}/agents/{agent_id}/runs/{run_id}", get(handlers::get_run))
        .route(
            "/v1/{tenant}/agents/{agent_id}/runs/search",
            post(handlers::search_runs),
        )
        .route(&health_path, get(handlers::health))
        .layer(CorsLayer::permissive())
        .with_state(state))
}

/// Starts and runs the server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    log::info!("Relay {version}");

    let app = router(config).await?;

    let listener = TcpListener::bind(listen_address).await?;
    let bound = listener.local_addr()?;

    if let Some(sender) = bound_addr_sender {
        let _ = sender.send(bound);
    }

    log::info!("listening on http://{bound}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await?;

    log::info!("server shut down");

    Ok(())
}

#[cfg(test)]
mod tests;
