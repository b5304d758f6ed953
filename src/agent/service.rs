//! Turn orchestration: session setup plus event reduction.
//!
//! [`AgentService`] owns the memoized runner. Every turn first makes sure the
//! caller's session exists, then either collects the final reply
//! ([`AgentService::run_agent`]) or forwards text fragments as they arrive
//! ([`AgentService::run_agent_stream`]).

use anyhow::Context;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::definition::AgentDefinition;
use super::events::Content;
use super::runner::Runner;
use super::traits::AgentRunner;
use crate::config::{Config, DeploymentProfile};
use crate::providers;
use crate::sessions::{self, SessionError, SessionKey};

/// User id used when the caller supplies none.
pub const ANONYMOUS_USER: &str = "anonymous";

type RunnerFactory =
    Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<dyn AgentRunner>>> + Send + Sync>;

pub struct AgentService {
    runner: OnceCell<Arc<dyn AgentRunner>>,
    factory: RunnerFactory,
}

impl AgentService {
    /// Service whose runner is built by `factory` on first use.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Arc<dyn AgentRunner>>> + Send + 'static,
    {
        Self {
            runner: OnceCell::new(),
            factory: Box::new(move || Box::pin(factory())),
        }
    }

    /// Service around an already constructed runner.
    pub fn with_runner(runner: Arc<dyn AgentRunner>) -> Self {
        Self {
            runner: OnceCell::new_with(Some(Arc::clone(&runner))),
            factory: Box::new(move || {
                let runner = Arc::clone(&runner);
                Box::pin(async move { Ok(runner) })
            }),
        }
    }

    /// Production wiring: provider, agent definition and in-memory sessions
    /// for the resolved profile.
    pub fn from_config(config: Arc<Config>, profile: Arc<DeploymentProfile>) -> Self {
        Self::new(move || {
            let config = Arc::clone(&config);
            let profile = Arc::clone(&profile);
            async move {
                let model = profile.model();
                let provider = providers::create_provider(model)
                    .context("failed to create model provider")?;
                let agent = AgentDefinition::build(&profile, &config)
                    .await
                    .context("failed to build agent definition")?;
                let runner = Runner::new(
                    config.app.name.clone(),
                    agent,
                    Arc::from(provider),
                    model.model.clone(),
                    sessions::create_session_store(),
                )
                .with_temperature(config.llm.temperature)
                .with_max_tool_iterations(config.agent.max_tool_iterations);

                tracing::info!(
                    app_name = %config.app.name,
                    provider = model.provider,
                    model = %model.model,
                    "Agent runner initialized"
                );
                Ok(Arc::new(runner) as Arc<dyn AgentRunner>)
            }
        })
    }

    /// The process-wide runner. Concurrent first callers share one
    /// construction; a failed construction is retried on the next call.
    pub async fn runner(&self) -> anyhow::Result<Arc<dyn AgentRunner>> {
        self.runner
            .get_or_try_init(|| (self.factory)())
            .await
            .map(Arc::clone)
    }

    pub fn is_initialized(&self) -> bool {
        self.runner.initialized()
    }

    /// One session per user: `"{user_id}_session"`.
    pub fn session_id_for(user_id: &str) -> String {
        format!("{user_id}_session")
    }

    /// Every caller without a user id shares the `anonymous` session. Only an
    /// absent or empty id counts as missing; other ids are used verbatim.
    fn identity(user_id: Option<&str>) -> (String, String) {
        let uid = user_id
            .filter(|u| !u.is_empty())
            .unwrap_or(ANONYMOUS_USER)
            .to_string();
        let session_id = Self::session_id_for(&uid);
        (uid, session_id)
    }

    async fn ensure_session(
        runner: &dyn AgentRunner,
        user_id: &str,
        session_id: &str,
    ) -> anyhow::Result<()> {
        let store = runner.sessions();
        let key = SessionKey::new(runner.app_name(), user_id, session_id);

        match store.get_or_create(&key).await {
            Ok(lookup) => {
                if lookup.was_created() {
                    tracing::info!(user_id, session_id, "Created session");
                }
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    user_id,
                    session_id,
                    error = %error,
                    "Session lookup failed; creating"
                );
                match store.create(&key).await {
                    Ok(_) | Err(SessionError::AlreadyExists(_)) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Run one turn and return the text of the final event. No final event
    /// yields an empty string.
    pub async fn run_agent(&self, message: &str, user_id: Option<&str>) -> anyhow::Result<String> {
        let (uid, session_id) = Self::identity(user_id);
        tracing::info!(
            user_id = %uid,
            session_id = %session_id,
            message_length = message.len(),
            "Running agent"
        );

        let result = async {
            let runner = self.runner().await?;
            Self::ensure_session(runner.as_ref(), &uid, &session_id).await?;

            let mut events = runner.run(uid.clone(), session_id.clone(), Content::user_text(message));
            let mut response = String::new();
            while let Some(event) = events.next().await {
                let event = event?;
                if event.is_final_response() {
                    response.extend(event.text_parts());
                }
            }
            Ok::<_, anyhow::Error>(response)
        }
        .await;

        match &result {
            Ok(response) => tracing::info!(
                user_id = %uid,
                session_id = %session_id,
                response_length = response.len(),
                "Agent response generated"
            ),
            Err(error) => tracing::error!(
                user_id = %uid,
                session_id = %session_id,
                error = %error,
                "Agent turn failed"
            ),
        }
        result
    }

    /// Run one turn lazily, yielding every non-empty text part of every event
    /// in order. An error is the terminal item. Dropping the stream cancels the turn.
    pub fn run_agent_stream(
        self: &Arc<Self>,
        message: impl Into<String>,
        user_id: Option<&str>,
    ) -> BoxStream<'static, anyhow::Result<String>> {
        let service = Arc::clone(self);
        let message = message.into();
        let (uid, session_id) = Self::identity(user_id);

        Box::pin(async_stream::stream! {
            tracing::info!(
                user_id = %uid,
                session_id = %session_id,
                message_length = message.len(),
                "Running agent (streaming)"
            );
            let runner = match service.runner().await {
                Ok(runner) => runner,
                Err(error) => {
                    log_stream_error(&uid, &session_id, &error);
                    yield Err(error);
                    return;
                }
            };
            if let Err(error) = Self::ensure_session(runner.as_ref(), &uid, &session_id).await {
                log_stream_error(&uid, &session_id, &error);
                yield Err(error);
                return;
            }

            let mut events = runner.run(uid.clone(), session_id.clone(), Content::user_text(message));
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        for text in event.text_parts().filter(|t| !t.is_empty()) {
                            yield Ok(text.to_string());
                        }
                    }
                    Err(error) => {
                        log_stream_error(&uid, &session_id, &error);
                        yield Err(error);
                        return;
                    }
                }
            }
            tracing::info!(user_id = %uid, session_id = %session_id, "Agent streaming completed");
        })
    }
}

fn log_stream_error(user_id: &str, session_id: &str, error: &anyhow::Error) {
    tracing::error!(user_id, session_id, error = %error, "Agent stream failed");
}
