use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DB: &str = "quiz_live";

/// Where the session collection lives.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
}

impl MongoConfig {
    /// Parse `uri`. The database is `db_name` when given, else the one named in the
    /// URI path, else `quiz_live`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        let database_name = pick_database(db_name, options.default_database.as_deref());

        Ok(Self {
            options,
            database_name,
        })
    }
}

fn pick_database(explicit: Option<&str>, from_uri: Option<&str>) -> String {
    explicit
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or(from_uri)
        .unwrap_or(DEFAULT_DB)
        .to_owned()
}
