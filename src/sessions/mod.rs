//! Session management: per-user conversation state keyed by app, user and session id.

pub mod in_memory;
pub mod traits;

pub use in_memory::InMemorySessionStore;
pub use traits::{Session, SessionError, SessionFilter, SessionKey, SessionLookup, SessionStore};

use std::sync::Arc;

/// Create a default in-memory session store.
pub fn create_session_store() -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new())
}
