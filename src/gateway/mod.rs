//! HTTP gateway: axum router, shared state and server lifecycle.

pub mod api;
pub mod rate_limit;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::agent::AgentService;
use crate::config::{Config, DeploymentProfile};
pub use rate_limit::RateLimiter;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub profile: Arc<DeploymentProfile>,
    pub agent: Arc<AgentService>,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        profile: Arc<DeploymentProfile>,
        agent: Arc<AgentService>,
    ) -> Self {
        let rate_limiter = config
            .gateway
            .rate_limit_enabled
            .then(|| Arc::new(RateLimiter::per_minute(config.gateway.rate_limit_per_minute)));
        Self {
            config,
            profile,
            agent,
            rate_limiter,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origins);
    let body_limit = state.config.gateway.body_limit_bytes;

    Router::new()
        .route("/", get(api::handle_root))
        .route("/health", get(api::handle_health))
        .route("/api/status", get(api::handle_status))
        .route("/api/chat", post(api::handle_chat))
        .route("/api/chat/stream", post(api::handle_chat_stream))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn run_gateway(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_port = listener.local_addr()?.port();

    tracing::info!(
        host,
        port = actual_port,
        environment = %state.profile.env(),
        "MCP Hub Agent gateway listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_follows_config() {
        let mut config = Config::default();
        config.gateway.rate_limit_enabled = false;
        config.llm.google_api_key = Some("g-key".into());
        let profile = Arc::new(config.resolve().unwrap());
        let agent = Arc::new(AgentService::from_config(
            Arc::new(config.clone()),
            Arc::clone(&profile),
        ));

        let state = AppState::new(Arc::new(config), profile, agent);
        assert!(state.rate_limiter.is_none());
    }

    #[test]
    fn wildcard_cors_origin_is_accepted() {
        // Builds without panicking for both shapes.
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&[
            "http://localhost:3000".to_string(),
            "not a header\n".to_string(),
        ]);
    }
}
