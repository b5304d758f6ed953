//! HTTP handlers: chat, streaming chat, health and service info.

use super::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use crate::agent::service::ANONYMOUS_USER;

// ── Request / response bodies ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Shared request checks: non-empty message, then the caller's rate window.
fn admit(state: &AppState, body: &ChatRequest) -> Result<(), Response> {
    if body.message.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "message must not be empty",
        ));
    }

    if let Some(limiter) = &state.rate_limiter {
        let key = body
            .user_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(ANONYMOUS_USER);
        if let Err(retry_after) = limiter.check(key) {
            tracing::warn!(user_id = key, "Rate limit exceeded");
            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
            if let Ok(value) = retry_after.as_secs().max(1).to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return Err(response);
        }
    }

    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /api/chat: run one turn and reply with the final text.
pub async fn handle_chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    if let Err(rejection) = admit(&state, &body) {
        return rejection;
    }

    match state
        .agent
        .run_agent(&body.message, body.user_id.as_deref())
        .await
    {
        Ok(response) => Json(ChatResponse { response }).into_response(),
        // Logged by the service.
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// POST /api/chat/stream: run one turn and forward text fragments as SSE.
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Response {
    if let Err(rejection) = admit(&state, &body) {
        return rejection;
    }

    let events = state
        .agent
        .run_agent_stream(body.message, body.user_id.as_deref())
        .map(|item| {
            Ok::<_, Infallible>(match item {
                Ok(fragment) => Event::default().data(fragment.replace('\r', "")),
                Err(e) => Event::default()
                    .event("error")
                    .data(serde_json::json!({ "error": e.to_string() }).to_string()),
            })
        });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// GET /health
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "app_name": state.config.app.name,
        "version": state.config.app.version,
        "environment": state.profile.env().as_str(),
        "model": state.profile.model().model,
    }))
}

/// GET /
pub async fn handle_root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "MCP Hub Agent API",
        "version": state.config.app.version,
        "health": "/health",
    }))
}

/// GET /api/status: runner and tool-server overview.
pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let tool_servers: Vec<serde_json::Value> = state
        .profile
        .tool_servers()
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.name,
                "url": s.url,
                "timeout_secs": s.timeout.as_secs(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "environment": state.profile.env().as_str(),
        "provider": state.profile.model().provider,
        "model": state.profile.model().model,
        "runner_initialized": state.agent.is_initialized(),
        "tool_servers": tool_servers,
        "web_url": state.profile.web_url(),
        "rate_limit_per_minute": state
            .rate_limiter
            .as_ref()
            .map(|_| state.config.gateway.rate_limit_per_minute),
    }))
}
