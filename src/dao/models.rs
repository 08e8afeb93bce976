use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Persisted lifecycle marker of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatusEntity {
    Lobby,
    Active,
    Ended,
}

/// Whole-aggregate representation of a quiz session as stored by a [`SessionStore`].
///
/// [`SessionStore`]: crate::dao::session_store::SessionStore
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Server generated identifier.
    pub id: Uuid,
    /// Short code players type to discover the session.
    pub join_code: String,
    pub title: String,
    /// Identity of the user who created the session.
    pub host_id: String,
    pub status: SessionStatusEntity,
    /// `-1` while in the lobby.
    pub current_question_index: i64,
    pub questions: Vec<QuestionEntity>,
    /// Players in join order.
    pub players: Vec<PlayerEntity>,
    /// Optimistic concurrency counter, bumped by every successful save.
    pub version: u64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Immutable question definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
    pub time_limit_seconds: u32,
}

/// Player slot embedded in a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    pub user_id: String,
    pub display_name: String,
    /// Live connection currently bound to the player, if any.
    pub channel_id: Option<Uuid>,
    pub is_connected: bool,
    pub score: u64,
    /// Question indices already answered, ascending.
    pub answered_question_indices: Vec<usize>,
}
