//! Process-local session store, used when no database is configured and in tests.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{SessionEntity, SessionStatusEntity},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

/// [`SessionStore`] keeping every aggregate in memory.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    /// Join code to the session that last claimed it.
    codes: DashMap<String, Uuid>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, id: Uuid) -> Option<SessionEntity> {
        self.inner.sessions.get(&id).map(|entry| entry.value().clone())
    }

    fn find_by_join_code(&self, code: &str) -> Option<SessionEntity> {
        let id = *self.inner.codes.get(code)?.value();
        self.find(id)
            .filter(|session| session.status != SessionStatusEntity::Ended)
    }

    fn create(&self, session: SessionEntity) -> StorageResult<()> {
        if self.inner.sessions.contains_key(&session.id) {
            return Err(StorageError::conflict(format!(
                "session `{}` already exists",
                session.id
            )));
        }

        match self.inner.codes.entry(session.join_code.clone()) {
            Entry::Occupied(mut occupied) => {
                let holder = *occupied.get();
                let live = self
                    .inner
                    .sessions
                    .get(&holder)
                    .is_some_and(|existing| existing.status != SessionStatusEntity::Ended);
                if live {
                    return Err(StorageError::conflict(format!(
                        "join code `{}` is held by a live session",
                        session.join_code
                    )));
                }
                occupied.insert(session.id);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(session.id);
            }
        }

        self.inner.sessions.insert(session.id, session);
        Ok(())
    }

    fn save(&self, mut session: SessionEntity, expected_version: u64) -> StorageResult<()> {
        let id = session.id;
        let mut slot = self
            .inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StorageError::conflict(format!("session `{id}` does not exist")))?;

        if slot.version != expected_version {
            return Err(StorageError::conflict(format!(
                "session `{id}` is at version {} (expected {expected_version})",
                slot.version
            )));
        }

        session.version = expected_version + 1;
        let released_code =
            (session.status == SessionStatusEntity::Ended).then(|| session.join_code.clone());
        *slot = session;
        drop(slot);

        if let Some(code) = released_code {
            self.inner.codes.remove_if(&code, |_, holder| *holder == id);
        }

        Ok(())
    }
}

impl SessionStore for MemorySessionStore {
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find(id)) })
    }

    fn find_session_by_join_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_by_join_code(&code)) })
    }

    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create(session) })
    }

    fn save_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save(session, expected_version) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
