pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::SessionEntity;
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use memory::MemorySessionStore;

/// Abstraction over the persistence layer holding quiz sessions.
///
/// Implementations only store and fetch whole aggregates; they never derive fields.
pub trait SessionStore: Send + Sync {
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Look up the session currently holding `code`. Ended sessions are not discoverable.
    fn find_session_by_join_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Insert a new aggregate; fails with a conflict when the join code is already live.
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Overwrite the aggregate if the stored version still equals `expected_version`.
    ///
    /// The stored copy ends with `version == expected_version + 1`.
    fn save_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
