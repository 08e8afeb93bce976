use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::doc,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::{PingBackoff, establish_connection},
    error::{MongoDaoError, MongoResult},
    models::{MongoSessionDocument, doc_id, doc_id_at_version, live_join_code},
};
use crate::dao::{models::SessionEntity, session_store::SessionStore, storage::StorageResult};

const SESSION_COLLECTION_NAME: &str = "sessions";
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // Held so the connection pool lives as long as the database handle.
    _client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = establish_connection(&self.config, PingBackoff::default()).await?;
        let mut guard = self.state.write().await;
        guard._client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = establish_connection(&config, PingBackoff::default()).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState {
                _client: client,
                database,
            }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Join codes are unique among sessions that have not ended yet.
    ///
    /// The `$in` partial filter requires MongoDB 6.0 or newer.
    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;
        let index = IndexModel::builder()
            .keys(doc! {"join_code": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_live_join_code_idx".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(
                        doc! {"status": {"$in": ["lobby", "active"]}},
                    ))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "join_code",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn find_session(&self, id: Uuid) -> MongoResult<Option<SessionEntity>> {
        let collection = self.collection().await;
        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSession { id, source })?;

        document.map(SessionEntity::try_from).transpose()
    }

    async fn find_session_by_join_code(&self, code: String) -> MongoResult<Option<SessionEntity>> {
        let collection = self.collection().await;
        let document = collection
            .find_one(live_join_code(&code))
            .await
            .map_err(|source| MongoDaoError::LoadByJoinCode { code, source })?;

        document.map(SessionEntity::try_from).transpose()
    }

    async fn create_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let code = session.join_code.clone();
        let document: MongoSessionDocument = session.into();
        let collection = self.collection().await;

        match collection.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(source) if is_duplicate_key(&source) => Err(MongoDaoError::JoinCodeTaken { code }),
            Err(source) => Err(MongoDaoError::CreateSession { id, source }),
        }
    }

    async fn save_session(&self, mut session: SessionEntity, expected: u64) -> MongoResult<()> {
        let id = session.id;
        session.version = expected + 1;
        let document: MongoSessionDocument = session.into();
        let collection = self.collection().await;

        let result = collection
            .replace_one(doc_id_at_version(id, expected), &document)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;

        if result.matched_count == 0 {
            return Err(MongoDaoError::VersionConflict { id, expected });
        }

        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}

impl SessionStore for MongoSessionStore {
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn find_session_by_join_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session_by_join_code(code)
                .await
                .map_err(Into::into)
        })
    }

    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(session).await.map_err(Into::into) })
    }

    fn save_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .save_session(session, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
