mod config;
mod connection;
mod error;
mod models;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::VersionConflict { id, expected } => StorageError::conflict(format!(
                "session `{id}` is no longer at version {expected}"
            )),
            MongoDaoError::JoinCodeTaken { code } => {
                StorageError::conflict(format!("join code `{code}` is held by a live session"))
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
