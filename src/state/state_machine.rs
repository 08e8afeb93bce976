use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle phases of a quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Players are gathering; no question has been shown yet.
    Lobby,
    /// Questions are being played; answers are accepted for the current one.
    Active,
    /// Terminal phase; only the final leaderboard can be retrieved.
    Ended,
}

/// Events that drive [`SessionStatus`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host starts the game from the lobby.
    Start,
    /// Host moves to the next question. `exhausted` is set when no question remains.
    Advance {
        /// True when the current question was the last one.
        exhausted: bool,
    },
    /// Host forces the game to finish.
    End,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the event was received.
    pub from: SessionStatus,
    /// The rejected event.
    pub event: SessionEvent,
}

impl SessionStatus {
    /// Compute the phase reached by applying `event`, if the transition is valid.
    pub fn transition(self, event: SessionEvent) -> Result<SessionStatus, InvalidTransition> {
        let next = match (self, event) {
            (SessionStatus::Lobby, SessionEvent::Start) => SessionStatus::Active,
            (SessionStatus::Active, SessionEvent::Advance { exhausted: false }) => {
                SessionStatus::Active
            }
            (SessionStatus::Active, SessionEvent::Advance { exhausted: true }) => {
                SessionStatus::Ended
            }
            (SessionStatus::Lobby | SessionStatus::Active, SessionEvent::End) => {
                SessionStatus::Ended
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
