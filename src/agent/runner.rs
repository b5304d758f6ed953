//! Session-backed runner: the model/tool loop for one agent.

use async_stream::try_stream;
use futures_util::Stream;
use std::collections::HashMap;
use std::sync::Arc;

use super::definition::AgentDefinition;
use super::events::{Content, Event, Part, Role};
use super::traits::{AgentRunner, EventStream};
use crate::providers::{ChatMessage, ChatRequest, Provider, ToolCall};
use crate::sessions::{SessionKey, SessionStore};
use crate::tools::{ToolSource, ToolSpec};

const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

pub struct Runner {
    app_name: String,
    agent: AgentDefinition,
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
    sessions: Arc<dyn SessionStore>,
    max_tool_iterations: usize,
}

impl Runner {
    pub fn new(
        app_name: impl Into<String>,
        agent: AgentDefinition,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            agent,
            provider,
            model: model.into(),
            temperature: 0.7,
            sessions,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// `0` keeps the default.
    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        if max > 0 {
            self.max_tool_iterations = max;
        }
        self
    }

    pub fn agent(&self) -> &AgentDefinition {
        &self.agent
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Declarations of every reachable tool source, plus a name → source route table.
    /// Unreachable sources are skipped for this turn.
    async fn collect_tools(&self) -> (Vec<ToolSpec>, HashMap<String, Arc<dyn ToolSource>>) {
        let mut specs = Vec::new();
        let mut routes: HashMap<String, Arc<dyn ToolSource>> = HashMap::new();

        for source in &self.agent.tool_sources {
            match source.tools().await {
                Ok(tools) => {
                    for spec in tools {
                        if routes.contains_key(&spec.name) {
                            tracing::warn!(
                                tool = %spec.name,
                                source = source.name(),
                                "Duplicate tool name; keeping the first declaration"
                            );
                            continue;
                        }
                        routes.insert(spec.name.clone(), Arc::clone(source));
                        specs.push(spec);
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        source = source.name(),
                        error = %error,
                        "Tool source unavailable; continuing without it"
                    );
                }
            }
        }

        (specs, routes)
    }

    /// Run one tool call. Failures become text for the model, not turn errors.
    async fn execute_tool(
        &self,
        routes: &HashMap<String, Arc<dyn ToolSource>>,
        call: &ToolCall,
        arguments: serde_json::Value,
    ) -> String {
        let Some(source) = routes.get(&call.name) else {
            tracing::warn!(tool = %call.name, "Model requested an unknown tool");
            return format!("Error: unknown tool '{}'", call.name);
        };

        tracing::debug!(tool = %call.name, source = source.name(), "Executing tool call");
        match source.call(&call.name, arguments).await {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(
                    tool = %call.name,
                    source = source.name(),
                    error = %error,
                    "Tool call failed"
                );
                format!("Error: {error}")
            }
        }
    }

    fn turn(
        self: Arc<Self>,
        user_id: String,
        session_id: String,
        message: Content,
    ) -> impl Stream<Item = anyhow::Result<Event>> + Send + 'static {
        try_stream! {
            let key = SessionKey::new(&self.app_name, user_id, session_id);
            let invocation_id = uuid::Uuid::new_v4().to_string();

            self.sessions.append(&key, message).await?;
            let (tools, routes) = self.collect_tools().await;
            let mut tool_rounds = 0usize;

            loop {
                let history = self.sessions.history(&key, None).await?;
                let messages = to_chat_messages(&self.agent.instruction, &history);
                let response = self
                    .provider
                    .chat(
                        ChatRequest {
                            messages: &messages,
                            tools: &tools,
                        },
                        &self.model,
                        self.temperature,
                    )
                    .await?;

                let has_tool_calls = response.has_tool_calls();
                let text = response.text.filter(|t| !t.is_empty());

                if has_tool_calls {
                    tool_rounds += 1;
                    if tool_rounds > self.max_tool_iterations {
                        Err::<(), _>(anyhow::anyhow!(
                            "Agent exceeded maximum tool iterations ({})",
                            self.max_tool_iterations
                        ))?;
                    }

                    let calls: Vec<(ToolCall, serde_json::Value)> = response
                        .tool_calls
                        .into_iter()
                        .map(|call| {
                            let arguments = parse_arguments(&call.arguments);
                            (call, arguments)
                        })
                        .collect();

                    let mut parts: Vec<Part> = text.into_iter().map(Part::text).collect();
                    parts.extend(calls.iter().map(|(call, arguments)| Part::FunctionCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: arguments.clone(),
                    }));
                    // Persisted together with its results below.
                    let call_content = Content::new(Role::Model, parts);
                    yield Event::new(&invocation_id, &self.agent.name, Some(call_content.clone()), false);

                    let mut results = Vec::with_capacity(calls.len());
                    for (call, arguments) in calls {
                        let output = self.execute_tool(&routes, &call, arguments).await;
                        results.push(Part::FunctionResponse {
                            id: call.id,
                            name: call.name,
                            response: output,
                        });
                    }
                    let tool_content = Content::new(Role::Tool, results);
                    self.sessions.append(&key, call_content).await?;
                    self.sessions.append(&key, tool_content.clone()).await?;
                    yield Event::new(&invocation_id, &self.agent.name, Some(tool_content), false);
                    continue;
                }

                let reply = Content::new(Role::Model, text.into_iter().map(Part::text).collect());
                self.sessions.append(&key, reply.clone()).await?;
                yield Event::new(&invocation_id, &self.agent.name, Some(reply), true);
                break;
            }
        }
    }
}

impl AgentRunner for Runner {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn sessions(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    fn run(self: Arc<Self>, user_id: String, session_id: String, message: Content) -> EventStream {
        Box::pin(self.turn(user_id, session_id, message))
    }
}

fn parse_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        tracing::warn!(arguments = raw, "Tool call arguments are not valid JSON");
        serde_json::json!({})
    })
}

/// Session history in provider terms, led by the system instructions.
fn to_chat_messages(instruction: &str, history: &[Content]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(instruction));

    for content in history {
        match content.role {
            Role::User => messages.push(ChatMessage::user(content.text())),
            Role::Model => {
                let calls: Vec<ToolCall> = content
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::FunctionCall {
                            id,
                            name,
                            arguments,
                        } => Some(ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            arguments: arguments.to_string(),
                        }),
                        _ => None,
                    })
                    .collect();
                let text = content.text();
                if calls.is_empty() {
                    messages.push(ChatMessage::assistant(text));
                } else {
                    let text = (!text.is_empty()).then_some(text);
                    messages.push(ChatMessage::assistant_tool_calls(text, calls));
                }
            }
            Role::Tool => {
                for part in &content.parts {
                    if let Part::FunctionResponse { id, response, .. } = part {
                        messages.push(ChatMessage::tool(id.clone(), response.clone()));
                    }
                }
            }
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatResponse;
    use crate::sessions::InMemorySessionStore;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use parking_lot::Mutex;

    /// Provider that replays canned responses and records what it was sent.
    struct ScriptedProvider {
        responses: Mutex<Vec<ChatResponse>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        tools_seen: Mutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
                tools_seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(
            &self,
            request: ChatRequest<'_>,
            _model: &str,
            _temperature: f64,
        ) -> anyhow::Result<ChatResponse> {
            self.seen.lock().push(request.messages.to_vec());
            self.tools_seen.lock().push(request.tools.len());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                anyhow::bail!("script exhausted");
            }
            Ok(responses.remove(0))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTools {
        fail_listing: bool,
    }

    #[async_trait]
    impl ToolSource for EchoTools {
        fn name(&self) -> &str {
            "echo"
        }

        async fn tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
            if self.fail_listing {
                anyhow::bail!("connection refused");
            }
            Ok(vec![ToolSpec {
                name: "echo".into(),
                description: "Echo the input".into(),
                parameters: serde_json::json!({"type": "object"}),
            }])
        }

        async fn call(&self, _name: &str, arguments: serde_json::Value) -> anyhow::Result<String> {
            Ok(format!("echo: {}", arguments["text"].as_str().unwrap_or_default()))
        }
    }

    /// Declares `echo` but never finishes a call.
    struct StuckTools;

    #[async_trait]
    impl ToolSource for StuckTools {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
            EchoTools { fail_listing: false }.tools().await
        }

        async fn call(&self, _name: &str, _arguments: serde_json::Value) -> anyhow::Result<String> {
            std::future::pending().await
        }
    }

    fn text_reply(text: &str) -> ChatResponse {
        ChatResponse {
            text: Some(text.into()),
            tool_calls: vec![],
        }
    }

    fn echo_call(id: &str) -> ChatResponse {
        ChatResponse {
            text: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: "echo".into(),
                arguments: r#"{"text":"ping"}"#.into(),
            }],
        }
    }

    fn runner(provider: Arc<ScriptedProvider>, sources: Vec<Arc<dyn ToolSource>>) -> Arc<Runner> {
        let agent = AgentDefinition {
            name: "test_agent".into(),
            instruction: "Be helpful.".into(),
            tool_sources: sources,
        };
        Arc::new(
            Runner::new(
                "test-app",
                agent,
                provider,
                "test-model",
                Arc::new(InMemorySessionStore::new()),
            )
            .with_max_tool_iterations(2),
        )
    }

    async fn run_turn(runner: &Arc<Runner>, text: &str) -> Vec<anyhow::Result<Event>> {
        let key = SessionKey::new("test-app", "alice", "alice_session");
        runner.sessions().get_or_create(&key).await.unwrap();
        Arc::clone(runner)
            .run(
                "alice".into(),
                "alice_session".into(),
                Content::user_text(text),
            )
            .collect()
            .await
    }

    #[tokio::test]
    async fn plain_reply_is_single_final_event() {
        let provider = ScriptedProvider::new(vec![text_reply("hello")]);
        let runner = runner(provider.clone(), vec![]);

        let events = run_turn(&runner, "hi").await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert!(event.is_final_response());
        assert_eq!(event.author, "test_agent");
        assert_eq!(event.content.as_ref().unwrap().text(), "hello");

        let sent = &provider.seen.lock()[0];
        assert_eq!(sent[0].role, "system");
        assert_eq!(sent[1].content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn tool_round_trip_emits_call_response_and_final_events() {
        let provider = ScriptedProvider::new(vec![echo_call("c1"), text_reply("done")]);
        let runner = runner(
            provider.clone(),
            vec![Arc::new(EchoTools { fail_listing: false })],
        );

        let events: Vec<Event> = run_turn(&runner, "use the tool")
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(events.len(), 3);
        assert!(events[0].content.as_ref().unwrap().has_function_calls());
        assert!(!events[0].is_final_response());
        match &events[1].content.as_ref().unwrap().parts[0] {
            Part::FunctionResponse { id, response, .. } => {
                assert_eq!(id, "c1");
                assert_eq!(response, "echo: ping");
            }
            other => panic!("unexpected part {other:?}"),
        }
        assert!(events[2].is_final_response());
        assert!(events
            .iter()
            .all(|e| e.invocation_id == events[0].invocation_id));

        // Second model call sees the assistant tool call and the tool result.
        let second = &provider.seen.lock()[1];
        assert_eq!(second[2].tool_calls[0].id, "c1");
        assert_eq!(second[3].role, "tool");
        assert_eq!(second[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn unreachable_tool_source_is_skipped() {
        let provider = ScriptedProvider::new(vec![text_reply("no tools today")]);
        let runner = runner(
            provider.clone(),
            vec![Arc::new(EchoTools { fail_listing: true })],
        );

        let events = run_turn(&runner, "hi").await;
        assert!(events[0].as_ref().unwrap().is_final_response());
        assert_eq!(provider.tools_seen.lock()[0], 0);
    }

    #[tokio::test]
    async fn dropped_turn_leaves_no_unanswered_tool_call() {
        let mut searching = echo_call("c1");
        searching.text = Some("Let me search".into());
        let provider = ScriptedProvider::new(vec![searching, text_reply("fresh start")]);
        let runner = runner(provider.clone(), vec![Arc::new(StuckTools)]);
        let key = SessionKey::new("test-app", "alice", "alice_session");
        runner.sessions().get_or_create(&key).await.unwrap();

        let mut events = Arc::clone(&runner).run(
            "alice".into(),
            "alice_session".into(),
            Content::user_text("search please"),
        );
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.content.as_ref().unwrap().text(), "Let me search");
        assert!(first.content.as_ref().unwrap().has_function_calls());
        // The tool call never completes.
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), events.next())
                .await
                .is_err()
        );
        drop(events);

        let history = runner.sessions().history(&key, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);

        let events = run_turn(&runner, "try again").await;
        assert!(events.last().unwrap().as_ref().unwrap().is_final_response());
        let resent = &provider.seen.lock()[1];
        assert!(resent.iter().all(|m| m.tool_calls.is_empty() && m.role != "tool"));
    }

    #[tokio::test]
    async fn exceeding_tool_iterations_ends_with_error() {
        let provider =
            ScriptedProvider::new(vec![echo_call("c1"), echo_call("c2"), echo_call("c3")]);
        let runner = runner(provider, vec![Arc::new(EchoTools { fail_listing: false })]);

        let events = run_turn(&runner, "loop").await;
        let last = events.last().unwrap();
        let err = last.as_ref().unwrap_err().to_string();
        assert!(err.contains("maximum tool iterations"));
        assert!(events.iter().all(|e| e
            .as_ref()
            .map(|ev| !ev.is_final_response())
            .unwrap_or(true)));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_model() {
        let provider = ScriptedProvider::new(vec![echo_call("c1"), text_reply("ok")]);
        let runner = runner(provider.clone(), vec![]);

        run_turn(&runner, "hi").await;
        let second = &provider.seen.lock()[1];
        assert!(second[3]
            .content
            .as_deref()
            .unwrap()
            .contains("unknown tool 'echo'"));
    }

    #[tokio::test]
    async fn history_persists_across_turns() {
        let provider = ScriptedProvider::new(vec![text_reply("first"), text_reply("second")]);
        let runner = runner(provider.clone(), vec![]);

        run_turn(&runner, "one").await;
        run_turn(&runner, "two").await;

        let second = &provider.seen.lock()[1];
        let roles: Vec<&str> = second.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
    }

    #[tokio::test]
    async fn run_without_session_fails() {
        let provider = ScriptedProvider::new(vec![text_reply("x")]);
        let runner = runner(provider, vec![]);
        let events: Vec<_> = Arc::clone(&runner)
            .run("bob".into(), "bob_session".into(), Content::user_text("hi"))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }
}
