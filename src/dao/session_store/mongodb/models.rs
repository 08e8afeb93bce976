use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{PlayerEntity, QuestionEntity, SessionEntity, SessionStatusEntity};

/// BSON layout of the `sessions` collection. Identifiers are stored as strings and
/// counters as `i64`, the integer width BSON supports natively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    join_code: String,
    title: String,
    host_id: String,
    status: SessionStatusEntity,
    current_question_index: i64,
    questions: Vec<MongoQuestionDocument>,
    players: Vec<MongoPlayerDocument>,
    version: i64,
    created_at: DateTime,
    updated_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoQuestionDocument {
    text: String,
    options: Vec<String>,
    correct_option_index: i64,
    time_limit_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoPlayerDocument {
    user_id: String,
    display_name: String,
    channel_id: Option<String>,
    is_connected: bool,
    score: i64,
    answered_question_indices: Vec<i64>,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            join_code: value.join_code,
            title: value.title,
            host_id: value.host_id,
            status: value.status,
            current_question_index: value.current_question_index,
            questions: value.questions.into_iter().map(Into::into).collect(),
            players: value.players.into_iter().map(Into::into).collect(),
            version: value.version as i64,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| MongoDaoError::InvalidDocument {
            id: value.id.clone(),
            reason: reason.to_owned(),
        };

        let id = Uuid::parse_str(&value.id).map_err(|_| invalid("`_id` is not a UUID"))?;
        let version = u64::try_from(value.version).map_err(|_| invalid("negative version"))?;
        let questions = value
            .questions
            .iter()
            .cloned()
            .map(QuestionEntity::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| invalid(reason))?;
        let players = value
            .players
            .iter()
            .cloned()
            .map(PlayerEntity::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| invalid(reason))?;

        Ok(Self {
            id,
            join_code: value.join_code,
            title: value.title,
            host_id: value.host_id,
            status: value.status,
            current_question_index: value.current_question_index,
            questions,
            players,
            version,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

impl From<QuestionEntity> for MongoQuestionDocument {
    fn from(value: QuestionEntity) -> Self {
        Self {
            text: value.text,
            options: value.options,
            correct_option_index: value.correct_option_index as i64,
            time_limit_seconds: i64::from(value.time_limit_seconds),
        }
    }
}

impl TryFrom<MongoQuestionDocument> for QuestionEntity {
    type Error = &'static str;

    fn try_from(value: MongoQuestionDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            text: value.text,
            options: value.options,
            correct_option_index: usize::try_from(value.correct_option_index)
                .map_err(|_| "negative correct option index")?,
            time_limit_seconds: u32::try_from(value.time_limit_seconds)
                .map_err(|_| "time limit out of range")?,
        })
    }
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            user_id: value.user_id,
            display_name: value.display_name,
            channel_id: value.channel_id.map(|id| id.to_string()),
            is_connected: value.is_connected,
            score: value.score as i64,
            answered_question_indices: value
                .answered_question_indices
                .into_iter()
                .map(|index| index as i64)
                .collect(),
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = &'static str;

    fn try_from(value: MongoPlayerDocument) -> Result<Self, Self::Error> {
        let channel_id = value
            .channel_id
            .map(|raw| Uuid::parse_str(&raw).map_err(|_| "channel id is not a UUID"))
            .transpose()?;
        let answered_question_indices = value
            .answered_question_indices
            .into_iter()
            .map(|index| usize::try_from(index).map_err(|_| "negative answered index"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            user_id: value.user_id,
            display_name: value.display_name,
            channel_id,
            is_connected: value.is_connected,
            score: u64::try_from(value.score).map_err(|_| "negative score")?,
            answered_question_indices,
        })
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

/// Filter matching the stored aggregate only while it is still at `version`.
pub fn doc_id_at_version(id: Uuid, version: u64) -> Document {
    doc! {"_id": id.to_string(), "version": version as i64}
}

/// Filter matching sessions that still hold their join code.
pub fn live_join_code(code: &str) -> Document {
    doc! {"join_code": code, "status": {"$in": ["lobby", "active"]}}
}
