//! Session registry
//!
//! The single authoritative map of active call identifiers to sessions.
//! Creation, lookup, and teardown all go through this store; the underlying
//! map is never exposed. Entries hold sessions behind an async mutex so an
//! event handler can keep borrowing a session after the map shard lock is
//! released.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::Mutex;

use super::{CallMetadata, Session};

/// Handle to one call's session.
pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// A setup event arrived for a call that is already live.
    #[error("session already exists for call {0}")]
    AlreadyExists(String),
}

/// Concurrent registry of live sessions, keyed by call identifier.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, SharedSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a new call.
    ///
    /// Fails without touching existing state when the call is already
    /// known, so a duplicate setup can never reset a live conversation.
    pub fn create(
        &self,
        metadata: CallMetadata,
        system_instruction: &str,
    ) -> Result<SharedSession, SessionStoreError> {
        match self.sessions.entry(metadata.call_id.clone()) {
            Entry::Occupied(_) => Err(SessionStoreError::AlreadyExists(metadata.call_id)),
            Entry::Vacant(slot) => {
                let session = Arc::new(Mutex::new(Session::new(metadata, system_instruction)));
                slot.insert(session.clone());
                Ok(session)
            }
        }
    }

    pub fn get(&self, call_id: &str) -> Option<SharedSession> {
        self.sessions.get(call_id).map(|entry| entry.value().clone())
    }

    /// Evict a session. Idempotent: removing an unknown call is a no-op.
    pub fn remove(&self, call_id: &str) -> Option<SharedSession> {
        self.sessions.remove(call_id).map(|(_, session)| session)
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.sessions.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Clone out the live handles for read-only reporting.
    ///
    /// The snapshot endpoint locks each session briefly; cloning the Arcs
    /// first keeps map shard locks out of that await.
    pub fn iter_sessions(&self) -> Vec<(String, SharedSession)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn metadata(call_id: &str) -> CallMetadata {
        CallMetadata {
            call_id: call_id.to_string(),
            from: None,
            to: None,
            direction: None,
            custom_parameters: HashMap::new(),
            started_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SessionStore::new();
        store.create(metadata("CA1"), "sys").expect("create");
        assert!(store.contains("CA1"));
        let session = store.get("CA1").expect("get");
        assert_eq!(session.lock().await.metadata.call_id, "CA1");
        assert!(store.get("CA2").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_does_not_reset_history() {
        let store = SessionStore::new();
        let session = store.create(metadata("CA1"), "sys").expect("create");
        session
            .lock()
            .await
            .conversation
            .push(crate::core::session::Message::user("hi"));

        let err = store.create(metadata("CA1"), "sys").unwrap_err();
        assert!(matches!(err, SessionStoreError::AlreadyExists(_)));

        let live = store.get("CA1").expect("still present");
        assert_eq!(live.lock().await.conversation.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = SessionStore::new();
        store.create(metadata("CA1"), "sys").expect("create");
        assert!(store.remove("CA1").is_some());
        assert!(store.remove("CA1").is_none());
        assert!(store.remove("never-existed").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_iter_sessions_lists_all_calls() {
        let store = SessionStore::new();
        store.create(metadata("CA1"), "sys").expect("create");
        store.create(metadata("CA2"), "sys").expect("create");
        let mut ids: Vec<String> = store
            .iter_sessions()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["CA1", "CA2"]);
        assert_eq!(store.len(), 2);
    }
}
