//! In-memory session store implementation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::traits::{Session, SessionError, SessionFilter, SessionKey, SessionLookup, SessionStore};
use crate::agent::events::Content;

/// An in-memory session store backed by a mutex-protected hash map.
///
/// Sessions live for the lifetime of the process. The lock is never held
/// across an await point.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn new_session(key: &SessionKey) -> Session {
        let now = Utc::now();
        Session {
            key: key.clone(),
            created_at: now,
            last_activity: now,
            history: Vec::new(),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, key: &SessionKey) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(key) {
            return Err(SessionError::AlreadyExists(key.clone()));
        }
        let session = Self::new_session(key);
        sessions.insert(key.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.lock();
        Ok(sessions.get(key).cloned())
    }

    async fn get_or_create(&self, key: &SessionKey) -> Result<SessionLookup, SessionError> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(key) {
            return Ok(SessionLookup::Found(existing.clone()));
        }
        let session = Self::new_session(key);
        sessions.insert(key.clone(), session.clone());
        Ok(SessionLookup::Created(session))
    }

    async fn append(&self, key: &SessionKey, content: Content) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(key) {
            Some(session) => {
                session.history.push(content);
                session.last_activity = Utc::now();
                Ok(())
            }
            None => Err(SessionError::NotFound(key.clone())),
        }
    }

    async fn history(
        &self,
        key: &SessionKey,
        limit: Option<usize>,
    ) -> Result<Vec<Content>, SessionError> {
        let sessions = self.sessions.lock();
        let Some(session) = sessions.get(key) else {
            return Err(SessionError::NotFound(key.clone()));
        };

        match limit {
            Some(n) => {
                let start = session.history.len().saturating_sub(n);
                Ok(session.history[start..].to_vec())
            }
            None => Ok(session.history.clone()),
        }
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, SessionError> {
        let sessions = self.sessions.lock();
        let mut results: Vec<Session> = sessions
            .values()
            .filter(|s| {
                if let Some(ref app_name) = filter.app_name {
                    if s.key.app_name != *app_name {
                        return false;
                    }
                }
                if let Some(ref user_id) = filter.user_id {
                    if s.key.user_id != *user_id {
                        return false;
                    }
                }
                if let Some(ref since) = filter.since {
                    if s.last_activity < *since {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), SessionError> {
        self.sessions.lock().remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_key() -> SessionKey {
        SessionKey::new("test-app", "alice", "alice_session")
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let store = InMemorySessionStore::new();
        let key = test_key();

        let created = store.create(&key).await.unwrap();
        assert_eq!(created.key.user_id, "alice");

        let fetched = store.get(&key).await.unwrap();
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().key.session_id, "alice_session");
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_session() {
        let store = InMemorySessionStore::new();
        let result = store.get(&test_key()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let store = InMemorySessionStore::new();
        let key = test_key();
        store.create(&key).await.unwrap();

        let err = store.create(&key).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn get_or_create_creates_then_finds() {
        let store = InMemorySessionStore::new();
        let key = test_key();

        assert!(store.get_or_create(&key).await.unwrap().was_created());
        let second = store.get_or_create(&key).await.unwrap();
        assert!(!second.was_created());
        assert_eq!(second.session().key, key);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_creates_once() {
        let store = Arc::new(InMemorySessionStore::new());
        let key = test_key();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move { store.get_or_create(&key).await.unwrap() })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().was_created() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list(&SessionFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_fails_for_missing_session() {
        let store = InMemorySessionStore::new();
        let result = store.append(&test_key(), Content::user_text("hi")).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn history_append_and_retrieve() {
        let store = InMemorySessionStore::new();
        let key = test_key();
        store.create(&key).await.unwrap();

        for i in 0..5 {
            store
                .append(&key, Content::user_text(format!("message {i}")))
                .await
                .unwrap();
        }

        let all = store.history(&key, None).await.unwrap();
        assert_eq!(all.len(), 5);

        // Limit returns the most recent entries
        let last_two = store.history(&key, Some(2)).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].text(), "message 3");
        assert_eq!(last_two[1].text(), "message 4");
    }

    #[tokio::test]
    async fn delete_removes_session_and_history() {
        let store = InMemorySessionStore::new();
        let key = test_key();
        store.create(&key).await.unwrap();
        store.append(&key, Content::user_text("hello")).await.unwrap();

        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.history(&key, None).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_user() {
        let store = InMemorySessionStore::new();
        store
            .create(&SessionKey::new("app", "alice", "alice_session"))
            .await
            .unwrap();
        store
            .create(&SessionKey::new("app", "bob", "bob_session"))
            .await
            .unwrap();

        let filter = SessionFilter {
            user_id: Some("alice".to_string()),
            ..Default::default()
        };
        let results = store.list(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key.user_id, "alice");
    }
}
