//! Messages, parts and runner events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a piece of content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Tool,
}

/// One unit of content. A model reply may mix text and function calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    FunctionCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    FunctionResponse {
        id: String,
        name: String,
        response: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A role-tagged message: one conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    /// Text parts in order, including empty ones.
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(Part::as_text)
    }

    /// All text parts concatenated.
    pub fn text(&self) -> String {
        self.text_parts().collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::FunctionCall { .. }))
    }
}

/// One step of a turn as produced by the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Shared by every event of the same turn.
    pub invocation_id: String,
    /// Name of the agent that produced the event.
    pub author: String,
    pub content: Option<Content>,
    /// Set on exactly one event of a successful turn: the authoritative reply.
    #[serde(rename = "final")]
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        content: Option<Content>,
        is_final: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            content,
            is_final,
            timestamp: Utc::now(),
        }
    }

    pub fn is_final_response(&self) -> bool {
        self.is_final
    }

    /// Text parts carried by this event, in order. Empty strings included.
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().flat_map(Content::text_parts)
    }
}
