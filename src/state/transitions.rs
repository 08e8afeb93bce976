use std::future::Future;

use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{models::SessionEntity, storage::StorageResult},
    error::ServiceError,
    state::{
        SessionGuard, SharedState,
        session::{Session, SessionError},
    },
};

/// A persisted session mutation, still holding the session lock.
///
/// Broadcasting before dropping this value keeps every channel's view of the
/// session in commit order.
pub struct Committed<T> {
    /// The session as stored, with its new version.
    pub session: Session,
    /// What the command returned.
    pub value: T,
    _guard: SessionGuard,
}

/// Await a store call, bounding it by the configured persistence timeout.
pub async fn with_persistence_timeout<T, Fut>(
    state: &SharedState,
    operation: &'static str,
    call: Fut,
) -> Result<T, ServiceError>
where
    Fut: Future<Output = StorageResult<T>>,
{
    let limit = state.config().persistence_timeout();
    match timeout(limit, call).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(_) => {
            warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "persistence call timed out"
            );
            Err(ServiceError::PersistenceTimeout)
        }
    }
}

/// Load a session without taking its lock. Used for read-only commands.
pub async fn load_session(state: &SharedState, session_id: Uuid) -> Result<Session, ServiceError> {
    let store = state.require_session_store().await?;
    with_persistence_timeout(state, "find_session", store.find_session(session_id))
        .await?
        .map(Session::from)
        .ok_or(ServiceError::SessionNotFound)
}

/// Apply `command` to the latest stored copy of a session and persist the result.
///
/// Commands on the same session are serialised through the session lock. A
/// timed out or conflicting write is retried from a fresh load, so `command`
/// may run more than once; it must only touch the session it is given. A command
/// that leaves the session unchanged is not written back.
pub async fn run_session_command<T, F>(
    state: &SharedState,
    session_id: Uuid,
    mut command: F,
) -> Result<Committed<T>, ServiceError>
where
    F: FnMut(&mut Session) -> Result<T, SessionError>,
{
    let guard = state.lock_session(session_id).await;
    let max_attempts = state.config().persistence_max_attempts();
    let mut attempt = 1;

    loop {
        match apply_once(state, session_id, &mut command).await {
            Ok((session, value)) => {
                debug!(
                    session_id = %session_id,
                    version = session.version,
                    attempt,
                    "session command committed"
                );
                return Ok(Committed {
                    session,
                    value,
                    _guard: guard,
                });
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(
                    session_id = %session_id,
                    attempt,
                    max_attempts,
                    error = %err,
                    "session command failed to persist; retrying"
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn apply_once<T, F>(
    state: &SharedState,
    session_id: Uuid,
    command: &mut F,
) -> Result<(Session, T), ServiceError>
where
    F: FnMut(&mut Session) -> Result<T, SessionError>,
{
    let mut session = load_session(state, session_id).await?;
    let expected_version = session.version;
    let value = command(&mut session)?;
    if !session.has_changes() {
        return Ok((session, value));
    }

    let store = state.require_session_store().await?;
    let entity: SessionEntity = session.clone().into();
    with_persistence_timeout(
        state,
        "save_session",
        store.save_session(entity, expected_version),
    )
    .await?;

    session.version = expected_version + 1;
    Ok((session, value))
}
