//! Streamable HTTP transport for MCP.
//!
//! Every JSON-RPC message is one POST to the server URL. The server answers
//! either with `application/json` or with a short `text/event-stream` whose
//! `data:` frames carry the response. A session id issued through the
//! `Mcp-Session-Id` header is echoed on every later request.

use parking_lot::Mutex;
use reqwest::{header, Client};
use std::time::Duration;

use super::protocol::{JsonRpcRequest, JsonRpcResponse};

pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("no response for request {0} in event stream")]
    MissingResponse(i64),
}

pub struct StreamableHttpTransport {
    client: Client,
    url: String,
    session_id: Mutex<Option<String>>,
}

impl StreamableHttpTransport {
    /// Connect and read timeouts are both bounded by `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            session_id: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response, TransportError> {
        let mut req = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream");

        if let Some(session_id) = self.session_id() {
            req = req.header(SESSION_HEADER, session_id);
        }

        let response = req.json(message).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status,
                body: crate::providers::sanitize_api_error(&body),
            });
        }

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(session_id.to_string());
        }

        Ok(response)
    }

    /// Send a request and wait for its response.
    pub async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let id = request.id.unwrap_or_default();
        let response = self.post(request).await?;

        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = response.text().await?;

        if is_event_stream {
            find_in_event_stream(&body, id)
        } else {
            Ok(serde_json::from_str(&body)?)
        }
    }

    /// Send a notification. The server acknowledges with 202 and no body.
    pub async fn notify(&self, notification: &JsonRpcRequest) -> Result<(), TransportError> {
        self.post(notification).await?;
        Ok(())
    }
}

/// Collect the `data:` payload of each SSE event in `body`.
fn event_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                payloads.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }

    payloads
}

fn find_in_event_stream(body: &str, id: i64) -> Result<JsonRpcResponse, TransportError> {
    event_payloads(body)
        .iter()
        .filter_map(|payload| serde_json::from_str::<JsonRpcResponse>(payload).ok())
        .find(|response| response.answers(id))
        .ok_or(TransportError::MissingResponse(id))
}
