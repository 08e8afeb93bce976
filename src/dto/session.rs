use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dto::{format_system_time, validation::validate_not_blank},
    state::{
        leaderboard::LeaderboardEntry,
        session::{AnswerOutcome, Player, Question, Session},
        state_machine::SessionStatus,
    },
};

/// Payload of `create_session`.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    #[validate(custom(function = validate_not_blank))]
    pub title: String,
    #[validate(
        length(min = 1, message = "a session needs at least one question"),
        nested
    )]
    pub questions: Vec<QuestionInput>,
}

/// Question definition supplied by the host.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct QuestionInput {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
    pub time_limit_seconds: u32,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_not_blank(&self.text) {
            errors.add("text", e);
        }

        if self.options.len() < 2 {
            let mut err = ValidationError::new("options_count");
            err.message = Some(
                format!(
                    "a question needs at least 2 options (got {})",
                    self.options.len()
                )
                .into(),
            );
            errors.add("options", err);
        } else if self.options.iter().any(|option| option.trim().is_empty()) {
            let mut err = ValidationError::new("blank_option");
            err.message = Some("options must not be blank".into());
            errors.add("options", err);
        }

        if self.correct_option_index >= self.options.len() {
            let mut err = ValidationError::new("correct_option_index_range");
            err.message = Some(
                format!(
                    "correct_option_index {} is out of range",
                    self.correct_option_index
                )
                .into(),
            );
            errors.add("correct_option_index", err);
        }

        if self.time_limit_seconds == 0 {
            let mut err = ValidationError::new("time_limit_seconds");
            err.message = Some("time limit must be positive".into());
            errors.add("time_limit_seconds", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        Self {
            text: value.text.trim().to_owned(),
            options: value.options,
            correct_option_index: value.correct_option_index,
            time_limit_seconds: value.time_limit_seconds,
        }
    }
}

/// Data returned by `create_session`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionCreated {
    pub session_id: Uuid,
    pub join_code: String,
}

/// Question as shown to clients; the correct option is never included.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionView {
    pub index: usize,
    pub total_questions: usize,
    pub text: String,
    pub options: Vec<String>,
    pub time_limit_seconds: u32,
}

impl QuestionView {
    pub fn new(index: usize, question: &Question, total_questions: usize) -> Self {
        Self {
            index,
            total_questions,
            text: question.text.clone(),
            options: question.options.clone(),
            time_limit_seconds: question.time_limit_seconds,
        }
    }

    /// View of the question currently open in `session`, if any.
    pub fn current(session: &Session) -> Option<Self> {
        session
            .current_question()
            .map(|(index, question)| Self::new(index, question, session.questions.len()))
    }
}

/// Public roster entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlayerView {
    pub user_id: String,
    pub display_name: String,
    pub is_connected: bool,
    pub score: u64,
}

impl From<&Player> for PlayerView {
    fn from(player: &Player) -> Self {
        Self {
            user_id: player.user_id.clone(),
            display_name: player.display_name.clone(),
            is_connected: player.is_connected,
            score: player.score,
        }
    }
}

/// Full state of a session as seen by one participant.
///
/// Sent in reply to `host_session`, `join_session` and `reconnect_session`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub join_code: String,
    pub title: String,
    pub host_id: String,
    pub status: SessionStatus,
    pub current_question_index: i64,
    pub total_questions: usize,
    pub players: Vec<PlayerView>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub current_question: Option<QuestionView>,
    /// Viewer's own score, absent for the host.
    pub your_score: Option<u64>,
    /// Whether the viewer already answered the open question.
    pub answered_current_question: Option<bool>,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionSnapshot {
    pub fn for_viewer(session: &Session, viewer_id: &str) -> Self {
        let current_question = QuestionView::current(session);
        let viewer = session.player(viewer_id);
        let answered_current_question = match (viewer, &current_question) {
            (Some(player), Some(question)) => {
                Some(player.answered_question_indices.contains(&question.index))
            }
            _ => None,
        };

        Self {
            session_id: session.id,
            join_code: session.join_code.clone(),
            title: session.title.clone(),
            host_id: session.host_id.clone(),
            status: session.status(),
            current_question_index: session.current_question_index(),
            total_questions: session.questions.len(),
            players: session.players().values().map(PlayerView::from).collect(),
            leaderboard: session.leaderboard(),
            current_question,
            your_score: viewer.map(|player| player.score),
            answered_current_question,
            created_at: format_system_time(session.created_at),
            updated_at: format_system_time(session.updated_at),
        }
    }
}

/// Acknowledgement of an accepted answer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerAck {
    pub question_index: usize,
    pub correct: bool,
    pub points_awarded: u64,
    pub score: u64,
}

impl AnswerAck {
    pub fn new(question_index: usize, outcome: AnswerOutcome) -> Self {
        Self {
            question_index,
            correct: outcome.correct,
            points_awarded: outcome.points_awarded,
            score: outcome.score,
        }
    }
}

/// Data returned by `next_question`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressAck {
    pub status: SessionStatus,
    pub current_question_index: i64,
}

impl From<&Session> for ProgressAck {
    fn from(session: &Session) -> Self {
        Self {
            status: session.status(),
            current_question_index: session.current_question_index(),
        }
    }
}

/// Ranked list returned by `get_leaderboard` and `GET /sessions/{id}/leaderboard`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardView {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl From<&Session> for LeaderboardView {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            status: session.status(),
            leaderboard: session.leaderboard(),
        }
    }
}

/// `waiting_lobby` payload: the roster while the host waits to start.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LobbyUpdate {
    pub title: String,
    pub join_code: String,
    pub players: Vec<PlayerView>,
}

impl From<&Session> for LobbyUpdate {
    fn from(session: &Session) -> Self {
        Self {
            title: session.title.clone(),
            join_code: session.join_code.clone(),
            players: session.players().values().map(PlayerView::from).collect(),
        }
    }
}

/// `game_started` payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GameStarted {
    pub total_questions: usize,
    pub player_count: usize,
}

/// `leaderboard_update` payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardUpdate {
    pub question_index: Option<usize>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Why a session reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    /// The host advanced past the last question.
    Completed,
    /// The host ended the game early.
    EndedByHost,
}

/// `game_over` payload with the final standings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GameOver {
    pub reason: GameOverReason,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// `player_presence` payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlayerPresence {
    pub user_id: String,
    pub display_name: String,
    pub is_connected: bool,
}

/// `answer_error` payload, sent only to the submitter.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerError {
    pub question_index: usize,
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> QuestionInput {
        QuestionInput {
            text: "2 + 2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_option_index: 1,
            time_limit_seconds: 20,
        }
    }

    #[test]
    fn valid_request_passes() {
        let request = CreateSessionRequest {
            title: "Maths".into(),
            questions: vec![input()],
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn request_needs_title_and_questions() {
        let request = CreateSessionRequest {
            title: "  ".into(),
            questions: vec![],
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("title"));
        assert!(fields.contains_key("questions"));
    }

    #[test]
    fn question_rules_are_enforced() {
        let mut question = input();
        question.options = vec!["only".into()];
        question.correct_option_index = 1;
        question.time_limit_seconds = 0;
        question.text = String::new();

        let errors = question.validate().unwrap_err();
        let fields = errors.field_errors();
        for field in ["text", "options", "correct_option_index", "time_limit_seconds"] {
            assert!(fields.contains_key(field), "missing error for {field}");
        }
    }

    #[test]
    fn nested_question_errors_fail_the_request() {
        let mut question = input();
        question.correct_option_index = 5;
        let request = CreateSessionRequest {
            title: "Maths".into(),
            questions: vec![input(), question],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn question_view_hides_correct_answer() {
        let question: Question = input().into();
        let value = serde_json::to_value(QuestionView::new(0, &question, 1)).unwrap();
        assert!(value.get("correct_option_index").is_none());
        assert_eq!(value["options"], serde_json::json!(["3", "4"]));
    }

    #[test]
    fn snapshot_reports_viewer_progress() {
        let mut session = Session::new(
            "Maths".into(),
            vec![input().into()],
            "host".into(),
            "ABC234".into(),
        );
        session.join("alice", "Alice", Uuid::new_v4()).unwrap();
        session.start("host").unwrap();
        session
            .submit_answer("alice", 0, 1, 0, &Default::default())
            .unwrap();

        let player_view = SessionSnapshot::for_viewer(&session, "alice");
        assert_eq!(player_view.answered_current_question, Some(true));
        assert_eq!(player_view.your_score, Some(1000));
        assert_eq!(player_view.current_question.as_ref().unwrap().index, 0);

        let host_view = serde_json::to_value(SessionSnapshot::for_viewer(&session, "host")).unwrap();
        assert!(host_view.get("your_score").is_none());
        assert_eq!(host_view["status"], "active");
    }
}
