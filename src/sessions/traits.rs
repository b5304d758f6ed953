//! Session storage traits and types for agent conversation state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::events::Content;

/// Composite key identifying a unique session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.app_name, self.user_id, self.session_id)
    }
}

/// A tracked conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Ordered conversational turns: user messages, model replies, tool results.
    pub history: Vec<Content>,
}

/// Outcome of [`SessionStore::get_or_create`].
#[derive(Debug, Clone)]
pub enum SessionLookup {
    Found(Session),
    Created(Session),
}

impl SessionLookup {
    pub fn session(&self) -> &Session {
        match self {
            Self::Found(s) | Self::Created(s) => s,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            Self::Found(s) | Self::Created(s) => s,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Filter criteria for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub app_name: Option<String>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session already exists: {0}")]
    AlreadyExists(SessionKey),

    #[error("session not found: {0}")]
    NotFound(SessionKey),

    #[error("session store unavailable: {0}")]
    Backend(String),
}

/// Storage for agent conversation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session. Fails with [`SessionError::AlreadyExists`] if the key is taken.
    async fn create(&self, key: &SessionKey) -> Result<Session, SessionError>;

    /// Get an existing session by key, if it exists.
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SessionError>;

    /// Return the session for `key`, creating it if absent. Atomic per key:
    /// concurrent callers observe exactly one `Created`.
    async fn get_or_create(&self, key: &SessionKey) -> Result<SessionLookup, SessionError>;

    /// Append one turn to the session history and bump its activity timestamp.
    async fn append(&self, key: &SessionKey, content: Content) -> Result<(), SessionError>;

    /// Session history, oldest first. `limit` keeps only the most recent entries.
    async fn history(
        &self,
        key: &SessionKey,
        limit: Option<usize>,
    ) -> Result<Vec<Content>, SessionError>;

    /// List sessions matching the given filter, most recently active first.
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, SessionError>;

    /// Delete a session and its history.
    async fn delete(&self, key: &SessionKey) -> Result<(), SessionError>;

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}
