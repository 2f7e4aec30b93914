use std::collections::HashMap;

use tokio::sync::RwLock;

use freightdesk_core::domain::session::SessionId;

use super::{RepositoryError, SessionRepository, SessionSnapshot, TransitionRecord};

#[derive(Default)]
struct MemoryStore {
    sessions: HashMap<String, SessionSnapshot>,
    transitions: Vec<TransitionRecord>,
}

/// Process-local session store with the same versioning rules as the SQL one.
#[derive(Default)]
pub struct InMemorySessionRepository {
    store: RwLock<MemoryStore>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.sessions.get(session_id.as_str()).cloned())
    }

    async fn save(
        &self,
        snapshot: &SessionSnapshot,
        transitions: &[TransitionRecord],
    ) -> Result<u32, RepositoryError> {
        let mut store = self.store.write().await;
        let stored_version =
            store.sessions.get(snapshot.session_id.as_str()).map_or(0, |existing| existing.version);
        if stored_version != snapshot.version {
            return Err(RepositoryError::VersionConflict {
                session_id: snapshot.session_id.to_string(),
                expected: snapshot.version,
            });
        }

        let mut saved = snapshot.clone();
        saved.version = snapshot.version + 1;
        if let Some(existing) = store.sessions.get(snapshot.session_id.as_str()) {
            saved.created_at = existing.created_at;
        }
        store.sessions.insert(snapshot.session_id.0.clone(), saved);
        store.transitions.extend_from_slice(transitions);
        Ok(snapshot.version + 1)
    }

    async fn list_transitions(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<TransitionRecord>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .transitions
            .iter()
            .filter(|transition| &transition.session_id == session_id)
            .cloned()
            .collect())
    }
}
