//! Runner interface consumed by the turn orchestrator.

use futures_util::stream::BoxStream;
use std::sync::Arc;

use super::events::{Content, Event};
use crate::sessions::SessionStore;

/// Events of one turn, pulled lazily. Dropping the stream cancels the turn.
pub type EventStream = BoxStream<'static, anyhow::Result<Event>>;

/// Executes turns of a single agent against a session store.
///
/// Implementations must yield at most one event with `is_final == true` per
/// turn; an error ends the stream.
pub trait AgentRunner: Send + Sync {
    /// Application name; first component of every session key.
    fn app_name(&self) -> &str;

    /// The store the runner reads history from. Callers create sessions here
    /// before calling [`AgentRunner::run`].
    fn sessions(&self) -> Arc<dyn SessionStore>;

    /// Submit one user message to an existing session.
    fn run(self: Arc<Self>, user_id: String, session_id: String, message: Content)
        -> EventStream;
}
