//! Generic OpenAI-compatible provider.
//! OpenAI and Gemini (through its `/v1beta/openai` surface) both accept the
//! `/chat/completions` format with function tools, so one client serves both.

use crate::providers::traits::{
    ChatMessage, ChatRequest as ProviderChatRequest, ChatResponse as ProviderChatResponse,
    Provider, ToolCall as ProviderToolCall,
};
use crate::tools::ToolSpec;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider that speaks the OpenAI-compatible chat completions API.
pub struct OpenAiCompatibleProvider {
    pub(crate) name: String,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleProvider {
    /// The key, when present, is sent as `Authorization: Bearer <key>`.
    pub fn new(name: &str, base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Build the full URL for chat completions, detecting if base_url already includes the path.
    fn chat_completions_url(&self) -> String {
        let has_full_endpoint = reqwest::Url::parse(&self.base_url)
            .map(|url| {
                url.path()
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            })
            .unwrap_or_else(|_| self.base_url.ends_with("/chat/completions"));

        if has_full_endpoint {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn apply_auth_header(
        &self,
        req: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {api_key}"))
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for Message {
    fn from(m: &ChatMessage) -> Self {
        let tool_calls = (!m.tool_calls.is_empty()).then(|| {
            m.tool_calls
                .iter()
                .map(|tc| ToolCall {
                    id: Some(tc.id.clone()),
                    kind: Some("function".to_string()),
                    function: Some(Function {
                        name: Some(tc.name.clone()),
                        arguments: Some(tc.arguments.clone()),
                    }),
                })
                .collect()
        });
        Self {
            role: m.role.clone(),
            content: m.content.clone(),
            tool_calls,
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ToolDefinition {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionDefinition,
}

#[derive(Debug, Serialize)]
struct FunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolSpec> for ToolDefinition {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: FunctionDefinition {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    function: Option<Function>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Function {
    name: Option<String>,
    arguments: Option<String>,
}

fn into_provider_response(message: ResponseMessage) -> ProviderChatResponse {
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| {
            let function = tc.function?;
            let name = function.name.filter(|n| !n.is_empty())?;
            let arguments = function
                .arguments
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| "{}".to_string());
            Some(ProviderToolCall {
                id: tc
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                name,
                arguments,
            })
        })
        .collect();

    ProviderChatResponse {
        text: message.content,
        tool_calls,
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn chat(
        &self,
        request: ProviderChatRequest<'_>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<ProviderChatResponse> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "{} API key not set. Set the credential for the active environment.",
                self.name
            )
        })?;

        let tools = (!request.tools.is_empty())
            .then(|| request.tools.iter().map(ToolDefinition::from).collect());

        let body = ChatRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(Message::from).collect(),
            temperature,
            tools,
            stream: Some(false),
        };

        let url = self.chat_completions_url();
        let response = self
            .apply_auth_header(self.client.post(&url).json(&body), api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::api_error(&self.name, response).await);
        }

        let chat_response: ApiChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| into_provider_response(c.message))
            .ok_or_else(|| anyhow::anyhow!("No response from {}", self.name))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_provider(name: &str, url: &str, key: Option<&str>) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(name, url, key)
    }

    /// One tool-less exchange: optional system prompt plus a user message.
    async fn ask(
        provider: &OpenAiCompatibleProvider,
        system_prompt: Option<&str>,
        message: &str,
        model: &str,
    ) -> anyhow::Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = system_prompt {
            messages.push(ChatMessage::system(sys));
        }
        messages.push(ChatMessage::user(message));
        let response = provider
            .chat(
                ProviderChatRequest {
                    messages: &messages,
                    tools: &[],
                },
                model,
                0.7,
            )
            .await?;
        Ok(response.text.unwrap_or_default())
    }

    #[test]
    fn creates_with_key() {
        let p = make_provider("openai", "https://api.openai.com/v1", Some("sk-key"));
        assert_eq!(p.name, "openai");
        assert_eq!(p.base_url, "https://api.openai.com/v1");
        assert_eq!(p.api_key.as_deref(), Some("sk-key"));
    }

    #[test]
    fn strips_trailing_slash() {
        let p = make_provider("test", "https://example.com/", None);
        assert_eq!(p.base_url, "https://example.com");
    }

    #[test]
    fn chat_url_appends_path_once() {
        let p = make_provider("test", "https://example.com/v1", None);
        assert_eq!(p.chat_completions_url(), "https://example.com/v1/chat/completions");

        let full = make_provider("test", "https://example.com/v1/chat/completions", None);
        assert_eq!(full.chat_completions_url(), "https://example.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn chat_fails_without_key() {
        let p = make_provider("Gemini", "https://example.com", None);
        let result = ask(&p, None, "hello", "gemini-2.0-flash-exp").await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Gemini API key not set"));
    }

    #[test]
    fn request_serializes_tools_and_tool_messages() {
        let history = vec![
            ChatMessage::user("find servers"),
            ChatMessage::assistant_tool_calls(
                None,
                vec![ProviderToolCall {
                    id: "call_1".into(),
                    name: "search".into(),
                    arguments: r#"{"q":"x"}"#.into(),
                }],
            ),
            ChatMessage::tool("call_1", "3 results"),
        ];
        let spec = ToolSpec {
            name: "search".into(),
            description: "Search servers".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let req = ChatRequest {
            model: "gpt-4o".into(),
            messages: history.iter().map(Message::from).collect(),
            temperature: 0.2,
            tools: Some(vec![ToolDefinition::from(&spec)]),
            stream: Some(false),
        };
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "search");
        assert_eq!(json["messages"][1]["tool_calls"][0]["id"], "call_1");
        assert!(json["messages"][1].get("content").is_none());
        assert_eq!(json["messages"][2]["tool_call_id"], "call_1");
    }

    #[test]
    fn response_with_tool_calls_fills_missing_ids_and_arguments() {
        let raw = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"type":"function","function":{"name":"search","arguments":""}},
            {"id":"abc","type":"function","function":{"name":"","arguments":"{}"}}
        ]}}]}"#;
        let parsed: ApiChatResponse = serde_json::from_str(raw).unwrap();
        let message = parsed.choices.into_iter().next().unwrap().message;
        let response = into_provider_response(message);

        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.tool_calls[0].arguments, "{}");
        assert!(!response.tool_calls[0].id.is_empty());
        assert!(response.text.is_none());
    }

    #[tokio::test]
    async fn chat_round_trip_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello back"}}]
            })))
            .mount(&server)
            .await;

        let p = make_provider("openai", &format!("{}/v1", server.uri()), Some("sk-test"));
        let reply = ask(&p, Some("be brief"), "hello", "gpt-4o").await.unwrap();
        assert_eq!(reply, "hello back");
    }

    #[tokio::test]
    async fn chat_error_status_is_sanitized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string("invalid key sk-live-abcdef123456"),
            )
            .mount(&server)
            .await;

        let p = make_provider("openai", &server.uri(), Some("sk-test"));
        let err = ask(&p, None, "hello", "gpt-4o")
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("401"));
        assert!(!err.contains("sk-live-abcdef123456"));
        assert!(err.contains("[REDACTED]"));
    }
}
