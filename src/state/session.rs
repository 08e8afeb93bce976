use std::{collections::BTreeSet, time::SystemTime};

use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dao::models::{PlayerEntity, QuestionEntity, SessionEntity, SessionStatusEntity},
    state::{
        leaderboard::{self, LeaderboardEntry},
        presence::ChannelId,
        scoring::ScoringPolicy,
        state_machine::{InvalidTransition, SessionEvent, SessionStatus},
    },
};

/// Rule violations raised by session operations. Nothing is mutated when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session already started")]
    SessionAlreadyStarted,
    #[error("only the host may issue this command")]
    NotHost,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("question already answered")]
    AlreadyAnswered,
    #[error("answer submitted after the time limit")]
    TimeExpired,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<InvalidTransition> for SessionError {
    fn from(err: InvalidTransition) -> Self {
        SessionError::InvalidState(err.to_string())
    }
}

/// Immutable question definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
    pub time_limit_seconds: u32,
}

impl Question {
    /// Time limit expressed in milliseconds, the unit clients report elapsed time in.
    pub fn time_limit_ms(&self) -> u64 {
        u64::from(self.time_limit_seconds) * 1000
    }
}

/// Participant slot. Identity fields never change once joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub user_id: String,
    pub display_name: String,
    pub channel_id: Option<ChannelId>,
    pub is_connected: bool,
    pub score: u64,
    pub answered_question_indices: BTreeSet<usize>,
}

impl Player {
    /// Fresh player bound to `channel_id` (connected when a channel is given).
    pub fn new(user_id: String, display_name: String, channel_id: Option<ChannelId>) -> Self {
        Self {
            user_id,
            display_name,
            is_connected: channel_id.is_some(),
            channel_id,
            score: 0,
            answered_question_indices: BTreeSet::new(),
        }
    }

    /// Bind `channel_id`, returning whether the slot changed.
    fn bind(&mut self, channel_id: ChannelId) -> bool {
        if self.is_connected && self.channel_id == Some(channel_id) {
            return false;
        }
        self.channel_id = Some(channel_id);
        self.is_connected = true;
        true
    }
}

/// How a join request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new player slot was created.
    Joined,
    /// The user already had a slot; its channel was rebound.
    Rejoined,
}

/// Result of an accepted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub points_awarded: u64,
    /// Player total after this answer.
    pub score: u64,
}

/// Result of a host advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A new question is now current.
    NextQuestion(usize),
    /// The last question was passed; the session ended.
    Finished,
}

/// Live quiz aggregate. Every mutation goes through the methods below.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub join_code: String,
    pub title: String,
    pub host_id: String,
    pub questions: Vec<Question>,
    status: SessionStatus,
    current_question_index: i64,
    players: IndexMap<String, Player>,
    /// Persistence version this copy was loaded at.
    pub version: u64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    /// Set by every mutation; never persisted.
    changed: bool,
}

impl Session {
    /// Build a new lobby owned by `host_id`.
    pub fn new(title: String, questions: Vec<Question>, host_id: String, join_code: String) -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            join_code,
            title,
            host_id,
            questions,
            status: SessionStatus::Lobby,
            current_question_index: -1,
            players: IndexMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            changed: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// `-1` until the game starts, so it stays `-1` when the host ends a session
    /// straight from the lobby. May equal `questions.len()` after the last advance.
    pub fn current_question_index(&self) -> i64 {
        self.current_question_index
    }

    /// Roster in join order.
    pub fn players(&self) -> &IndexMap<String, Player> {
        &self.players
    }

    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.get(user_id)
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id == user_id
    }

    /// Question currently open for answers, if the session is active.
    pub fn current_question(&self) -> Option<(usize, &Question)> {
        if self.status != SessionStatus::Active {
            return None;
        }
        let index = usize::try_from(self.current_question_index).ok()?;
        self.questions.get(index).map(|question| (index, question))
    }

    /// Ranked standings computed from the current roster.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        leaderboard::rank(&self.players)
    }

    /// Add a player, or rebind the channel of a returning one.
    ///
    /// New players are only admitted in the lobby; returning players are accepted in
    /// every phase so they can recover their state or the final standings.
    pub fn join(
        &mut self,
        user_id: &str,
        display_name: &str,
        channel_id: ChannelId,
    ) -> Result<JoinOutcome, SessionError> {
        if self.is_host(user_id) {
            return Err(SessionError::InvalidState(
                "the host cannot join its own session as a player".into(),
            ));
        }

        if let Some(player) = self.players.get_mut(user_id) {
            if player.bind(channel_id) {
                self.touch();
            }
            return Ok(JoinOutcome::Rejoined);
        }

        if self.status != SessionStatus::Lobby {
            return Err(SessionError::SessionAlreadyStarted);
        }

        self.players.insert(
            user_id.to_owned(),
            Player::new(user_id.to_owned(), display_name.to_owned(), Some(channel_id)),
        );
        self.touch();
        Ok(JoinOutcome::Joined)
    }

    /// Rebind the channel of an existing player.
    pub fn reconnect(&mut self, user_id: &str, channel_id: ChannelId) -> Result<(), SessionError> {
        let player = self
            .players
            .get_mut(user_id)
            .ok_or_else(|| SessionError::InvalidState("not a player of this session".into()))?;
        if player.bind(channel_id) {
            self.touch();
        }
        Ok(())
    }

    /// Host moves the lobby to the first question.
    pub fn start(&mut self, caller_id: &str) -> Result<(), SessionError> {
        self.ensure_host(caller_id)?;
        let next = self.status.transition(SessionEvent::Start)?;
        if self.players.is_empty() {
            return Err(SessionError::InvalidState(
                "cannot start a session without players".into(),
            ));
        }
        if self.questions.is_empty() {
            return Err(SessionError::InvalidState(
                "cannot start a session without questions".into(),
            ));
        }

        self.status = next;
        self.current_question_index = 0;
        self.touch();
        Ok(())
    }

    /// Score one answer for the current question, at most once per player and question.
    pub fn submit_answer(
        &mut self,
        user_id: &str,
        question_index: usize,
        option_index: usize,
        elapsed_ms: u64,
        policy: &ScoringPolicy,
    ) -> Result<AnswerOutcome, SessionError> {
        let (current, question) = self
            .current_question()
            .ok_or_else(|| SessionError::InvalidState("no question is open for answers".into()))?;

        if question_index != current {
            return Err(SessionError::InvalidState(format!(
                "question {question_index} is not the current question ({current})"
            )));
        }
        if option_index >= question.options.len() {
            return Err(SessionError::InvalidInput(format!(
                "option {option_index} does not exist (question has {} options)",
                question.options.len()
            )));
        }

        let correct = option_index == question.correct_option_index;
        let limit_ms = question.time_limit_ms();

        let player = self
            .players
            .get_mut(user_id)
            .ok_or_else(|| SessionError::InvalidState("not a player of this session".into()))?;

        if player.answered_question_indices.contains(&current) {
            return Err(SessionError::AlreadyAnswered);
        }
        if elapsed_ms > limit_ms {
            return Err(SessionError::TimeExpired);
        }

        let points_awarded = policy.award(correct, elapsed_ms, limit_ms);
        player.answered_question_indices.insert(current);
        player.score = player.score.saturating_add(points_awarded);
        let score = player.score;
        self.touch();

        Ok(AnswerOutcome {
            correct,
            points_awarded,
            score,
        })
    }

    /// Host moves to the next question, ending the session after the last one.
    pub fn advance(&mut self, caller_id: &str) -> Result<AdvanceOutcome, SessionError> {
        self.ensure_host(caller_id)?;
        let next_index = self.current_question_index + 1;
        let exhausted = usize::try_from(next_index)
            .map(|index| index >= self.questions.len())
            .unwrap_or(true);
        let next = self
            .status
            .transition(SessionEvent::Advance { exhausted })?;

        self.status = next;
        self.current_question_index = next_index;
        self.touch();

        if exhausted {
            Ok(AdvanceOutcome::Finished)
        } else {
            Ok(AdvanceOutcome::NextQuestion(next_index as usize))
        }
    }

    /// Host forces the session to end.
    pub fn end(&mut self, caller_id: &str) -> Result<(), SessionError> {
        self.ensure_host(caller_id)?;
        self.status = self.status.transition(SessionEvent::End)?;
        self.touch();
        Ok(())
    }

    /// Mark the player offline if `channel_id` is still the channel bound to it.
    ///
    /// Returns whether anything changed; a stale channel closing after a rebind is a no-op.
    pub fn disconnect(&mut self, user_id: &str, channel_id: ChannelId) -> bool {
        let Some(player) = self.players.get_mut(user_id) else {
            return false;
        };
        if player.channel_id != Some(channel_id) {
            return false;
        }

        player.channel_id = None;
        player.is_connected = false;
        self.touch();
        true
    }

    fn ensure_host(&self, caller_id: &str) -> Result<(), SessionError> {
        if self.is_host(caller_id) {
            Ok(())
        } else {
            Err(SessionError::NotHost)
        }
    }

    /// Whether this copy was mutated since it was created or loaded.
    pub fn has_changes(&self) -> bool {
        self.changed
    }

    fn touch(&mut self) {
        self.changed = true;
        self.updated_at = SystemTime::now();
    }
}

impl From<SessionStatusEntity> for SessionStatus {
    fn from(value: SessionStatusEntity) -> Self {
        match value {
            SessionStatusEntity::Lobby => SessionStatus::Lobby,
            SessionStatusEntity::Active => SessionStatus::Active,
            SessionStatusEntity::Ended => SessionStatus::Ended,
        }
    }
}

impl From<SessionStatus> for SessionStatusEntity {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Lobby => SessionStatusEntity::Lobby,
            SessionStatus::Active => SessionStatusEntity::Active,
            SessionStatus::Ended => SessionStatusEntity::Ended,
        }
    }
}

impl From<QuestionEntity> for Question {
    fn from(value: QuestionEntity) -> Self {
        Self {
            text: value.text,
            options: value.options,
            correct_option_index: value.correct_option_index,
            time_limit_seconds: value.time_limit_seconds,
        }
    }
}

impl From<Question> for QuestionEntity {
    fn from(value: Question) -> Self {
        Self {
            text: value.text,
            options: value.options,
            correct_option_index: value.correct_option_index,
            time_limit_seconds: value.time_limit_seconds,
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            user_id: value.user_id,
            display_name: value.display_name,
            channel_id: value.channel_id,
            is_connected: value.is_connected,
            score: value.score,
            answered_question_indices: value.answered_question_indices.into_iter().collect(),
        }
    }
}

impl From<Player> for PlayerEntity {
    fn from(value: Player) -> Self {
        Self {
            user_id: value.user_id,
            display_name: value.display_name,
            channel_id: value.channel_id,
            is_connected: value.is_connected,
            score: value.score,
            answered_question_indices: value.answered_question_indices.into_iter().collect(),
        }
    }
}

impl From<SessionEntity> for Session {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id,
            join_code: value.join_code,
            title: value.title,
            host_id: value.host_id,
            questions: value.questions.into_iter().map(Into::into).collect(),
            status: value.status.into(),
            current_question_index: value.current_question_index,
            players: value
                .players
                .into_iter()
                .map(|player| (player.user_id.clone(), player.into()))
                .collect(),
            version: value.version,
            created_at: value.created_at,
            updated_at: value.updated_at,
            changed: false,
        }
    }
}

impl From<Session> for SessionEntity {
    fn from(value: Session) -> Self {
        Self {
            id: value.id,
            join_code: value.join_code,
            title: value.title,
            host_id: value.host_id,
            status: value.status.into(),
            current_question_index: value.current_question_index,
            questions: value.questions.into_iter().map(Into::into).collect(),
            players: value.players.into_values().map(Into::into).collect(),
            version: value.version,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "host";

    fn question(correct: usize) -> Question {
        Question {
            text: "Pick one".into(),
            options: vec!["a".into(), "b".into(), "c".into()],
            correct_option_index: correct,
            time_limit_seconds: 10,
        }
    }

    fn lobby(questions: usize) -> Session {
        Session::new(
            "Trivia".into(),
            (0..questions).map(|_| question(1)).collect(),
            HOST.into(),
            "ABC234".into(),
        )
    }

    fn started(players: &[&str]) -> Session {
        let mut session = lobby(2);
        for user in players {
            session.join(user, user, Uuid::new_v4()).unwrap();
        }
        session.start(HOST).unwrap();
        session
    }

    #[test]
    fn new_session_starts_in_lobby() {
        let session = lobby(2);
        assert_eq!(session.status(), SessionStatus::Lobby);
        assert_eq!(session.current_question_index(), -1);
        assert!(session.players().is_empty());
        assert!(session.current_question().is_none());
    }

    #[test]
    fn joining_twice_keeps_a_single_slot() {
        let mut session = lobby(1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(session.join("alice", "Alice", first), Ok(JoinOutcome::Joined));
        assert_eq!(session.join("alice", "Alias", second), Ok(JoinOutcome::Rejoined));

        assert_eq!(session.players().len(), 1);
        let player = session.player("alice").unwrap();
        assert_eq!(player.display_name, "Alice");
        assert_eq!(player.channel_id, Some(second));
    }

    #[test]
    fn no_op_commands_leave_the_copy_clean() {
        let mut session = lobby(1);
        let channel = Uuid::new_v4();
        session.join("alice", "Alice", channel).unwrap();
        assert!(session.has_changes());

        let mut reloaded = Session::from(SessionEntity::from(session));
        assert!(!reloaded.has_changes());
        reloaded.join("alice", "Alice", channel).unwrap();
        reloaded.reconnect("alice", channel).unwrap();
        assert!(!reloaded.disconnect("alice", Uuid::new_v4()));
        assert!(!reloaded.has_changes());

        assert!(reloaded.disconnect("alice", channel));
        assert!(reloaded.has_changes());
    }

    #[test]
    fn ending_from_the_lobby_keeps_the_unstarted_index() {
        let mut session = lobby(2);
        session.end(HOST).unwrap();
        assert_eq!(session.status(), SessionStatus::Ended);
        assert_eq!(session.current_question_index(), -1);
    }

    #[test]
    fn new_player_cannot_join_after_start() {
        let mut session = started(&["alice"]);
        assert_eq!(
            session.join("bob", "Bob", Uuid::new_v4()),
            Err(SessionError::SessionAlreadyStarted)
        );
        assert_eq!(
            session.join("alice", "Alice", Uuid::new_v4()),
            Ok(JoinOutcome::Rejoined)
        );
    }

    #[test]
    fn host_cannot_join_as_player() {
        let mut session = lobby(1);
        assert!(matches!(
            session.join(HOST, "Host", Uuid::new_v4()),
            Err(SessionError::InvalidState(_))
        ));
    }

    #[test]
    fn start_requires_host_and_players() {
        let mut session = lobby(1);
        assert!(matches!(session.start(HOST), Err(SessionError::InvalidState(_))));

        session.join("alice", "Alice", Uuid::new_v4()).unwrap();
        assert_eq!(session.start("alice"), Err(SessionError::NotHost));

        session.start(HOST).unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.current_question_index(), 0);

        assert!(matches!(session.start(HOST), Err(SessionError::InvalidState(_))));
    }

    #[test]
    fn answer_is_scored_exactly_once() {
        let mut session = started(&["alice"]);
        let policy = ScoringPolicy::default();

        let outcome = session.submit_answer("alice", 0, 1, 0, &policy).unwrap();
        assert!(outcome.correct);
        assert_eq!(outcome.points_awarded, policy.max_points());
        assert_eq!(outcome.score, policy.max_points());

        assert_eq!(
            session.submit_answer("alice", 0, 1, 0, &policy),
            Err(SessionError::AlreadyAnswered)
        );
        assert_eq!(session.player("alice").unwrap().score, policy.max_points());
    }

    #[test]
    fn incorrect_answer_is_recorded_without_points() {
        let mut session = started(&["alice"]);
        let outcome = session
            .submit_answer("alice", 0, 2, 100, &ScoringPolicy::default())
            .unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.points_awarded, 0);

        let player = session.player("alice").unwrap();
        assert_eq!(player.score, 0);
        assert!(player.answered_question_indices.contains(&0));
    }

    #[test]
    fn late_answer_is_rejected_and_can_be_retried_in_time() {
        let mut session = started(&["alice"]);
        let policy = ScoringPolicy::default();

        assert_eq!(
            session.submit_answer("alice", 0, 1, 10_001, &policy),
            Err(SessionError::TimeExpired)
        );
        assert!(session.player("alice").unwrap().answered_question_indices.is_empty());

        assert!(session.submit_answer("alice", 0, 1, 10_000, &policy).is_ok());
    }

    #[test]
    fn answer_for_another_question_is_rejected() {
        let mut session = started(&["alice"]);
        let policy = ScoringPolicy::default();
        assert!(matches!(
            session.submit_answer("alice", 1, 1, 0, &policy),
            Err(SessionError::InvalidState(_))
        ));

        session.advance(HOST).unwrap();
        assert!(matches!(
            session.submit_answer("alice", 0, 1, 0, &policy),
            Err(SessionError::InvalidState(_))
        ));
        assert!(session.submit_answer("alice", 1, 1, 0, &policy).is_ok());
    }

    #[test]
    fn unknown_option_and_unknown_player_are_rejected() {
        let mut session = started(&["alice"]);
        let policy = ScoringPolicy::default();
        assert!(matches!(
            session.submit_answer("alice", 0, 3, 0, &policy),
            Err(SessionError::InvalidInput(_))
        ));
        assert!(matches!(
            session.submit_answer("mallory", 0, 1, 0, &policy),
            Err(SessionError::InvalidState(_))
        ));
    }

    #[test]
    fn advancing_past_last_question_ends_session() {
        let mut session = started(&["alice"]);
        assert_eq!(session.advance("alice"), Err(SessionError::NotHost));
        assert_eq!(session.advance(HOST), Ok(AdvanceOutcome::NextQuestion(1)));
        assert_eq!(session.advance(HOST), Ok(AdvanceOutcome::Finished));
        assert_eq!(session.status(), SessionStatus::Ended);
        assert_eq!(session.current_question_index(), 2);

        assert!(matches!(session.advance(HOST), Err(SessionError::InvalidState(_))));
        assert!(matches!(
            session.submit_answer("alice", 1, 1, 0, &ScoringPolicy::default()),
            Err(SessionError::InvalidState(_))
        ));
    }

    #[test]
    fn end_is_host_only_and_terminal() {
        let mut session = lobby(1);
        assert_eq!(session.end("alice"), Err(SessionError::NotHost));
        session.end(HOST).unwrap();
        assert_eq!(session.status(), SessionStatus::Ended);
        assert_eq!(session.current_question_index(), -1);
        assert!(matches!(session.end(HOST), Err(SessionError::InvalidState(_))));
    }

    #[test]
    fn disconnect_and_reconnect_keep_progress() {
        let mut session = started(&["alice"]);
        let channel = session.player("alice").unwrap().channel_id.unwrap();
        session
            .submit_answer("alice", 0, 1, 500, &ScoringPolicy::default())
            .unwrap();
        let score = session.player("alice").unwrap().score;

        assert!(session.disconnect("alice", channel));
        let player = session.player("alice").unwrap();
        assert!(!player.is_connected);
        assert_eq!(player.channel_id, None);
        assert_eq!(player.score, score);

        let fresh = Uuid::new_v4();
        session.reconnect("alice", fresh).unwrap();
        let player = session.player("alice").unwrap();
        assert!(player.is_connected);
        assert_eq!(player.channel_id, Some(fresh));
        assert_eq!(player.score, score);
        assert_eq!(session.players().len(), 1);
        assert_eq!(
            session.submit_answer("alice", 0, 1, 0, &ScoringPolicy::default()),
            Err(SessionError::AlreadyAnswered)
        );
    }

    #[test]
    fn stale_channel_close_does_not_disconnect_rebound_player() {
        let mut session = started(&["alice"]);
        let old = session.player("alice").unwrap().channel_id.unwrap();
        let fresh = Uuid::new_v4();
        session.reconnect("alice", fresh).unwrap();

        assert!(!session.disconnect("alice", old));
        assert!(session.player("alice").unwrap().is_connected);
    }

    #[test]
    fn entity_round_trip_preserves_join_order() {
        let mut session = lobby(1);
        for user in ["carol", "alice", "bob"] {
            session.join(user, user, Uuid::new_v4()).unwrap();
        }
        let entity: SessionEntity = session.clone().into();
        let restored: Session = entity.into();
        assert_eq!(
            restored.players().keys().collect::<Vec<_>>(),
            vec!["carol", "alice", "bob"]
        );
        assert_eq!(restored.status(), SessionStatus::Lobby);
    }
}
