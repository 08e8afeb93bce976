//! Outbound frames: command replies to one channel and event fan-out to a session's
//! broadcast group.

use axum::extract::ws::Message;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dto::{
        session::{
            AnswerError, GameOver, GameOverReason, GameStarted, LeaderboardUpdate, LobbyUpdate,
            PlayerPresence, QuestionView,
        },
        ws::{EventFrame, EventName, ResponseEnvelope, ServerFrame},
    },
    error::ServiceError,
    state::{SharedState, session::Session},
};

/// The writer task of a channel has stopped.
#[derive(Debug, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Serialize a frame and queue it on one channel.
///
/// Serialization failures are logged and swallowed; only a closed writer is reported.
pub fn send_frame(
    tx: &mpsc::UnboundedSender<Message>,
    frame: &ServerFrame,
) -> Result<(), ConnectionClosed> {
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize outbound frame");
            return Ok(());
        }
    };
    tx.send(Message::Text(payload.into()))
        .map_err(|_| ConnectionClosed)
}

/// Reply to the channel that issued a command.
pub fn send_response(
    tx: &mpsc::UnboundedSender<Message>,
    envelope: ResponseEnvelope,
) -> Result<(), ConnectionClosed> {
    send_frame(tx, &ServerFrame::Response(envelope))
}

/// Push an event to a single channel.
pub fn send_event(
    tx: &mpsc::UnboundedSender<Message>,
    session_id: Uuid,
    event: EventName,
    payload: &impl Serialize,
) -> Result<(), ConnectionClosed> {
    let Some(frame) = event_frame(session_id, event, payload) else {
        return Ok(());
    };
    send_frame(tx, &frame)
}

/// Push an event to every channel registered under `session_id`.
///
/// Must be called while the session lock is held so all members see one order.
pub fn broadcast(state: &SharedState, session_id: Uuid, event: EventName, payload: &impl Serialize) {
    let Some(frame) = event_frame(session_id, event, payload) else {
        return;
    };
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(err) => {
            warn!(?event, error = %err, "failed to serialize event frame");
            return;
        }
    };

    for member in state.membership().members(session_id) {
        if member.tx.send(Message::Text(text.clone().into())).is_err() {
            debug!(
                session_id = %session_id,
                channel_id = %member.id,
                ?event,
                "dropping event for closed channel"
            );
        }
    }
}

fn event_frame(session_id: Uuid, event: EventName, payload: &impl Serialize) -> Option<ServerFrame> {
    match serde_json::to_value(payload) {
        Ok(data) => Some(ServerFrame::Event(EventFrame {
            event,
            session_id,
            data,
        })),
        Err(err) => {
            warn!(?event, error = %err, "failed to serialize event payload");
            None
        }
    }
}

pub fn broadcast_waiting_lobby(state: &SharedState, session: &Session) {
    broadcast(
        state,
        session.id,
        EventName::WaitingLobby,
        &LobbyUpdate::from(session),
    );
}

pub fn broadcast_game_started(state: &SharedState, session: &Session) {
    let payload = GameStarted {
        total_questions: session.questions.len(),
        player_count: session.players().len(),
    };
    broadcast(state, session.id, EventName::GameStarted, &payload);
}

/// Announce the open question. Does nothing when no question is open.
pub fn broadcast_new_question(state: &SharedState, session: &Session) {
    if let Some(question) = QuestionView::current(session) {
        broadcast(state, session.id, EventName::NewQuestion, &question);
    }
}

pub fn broadcast_leaderboard_update(
    state: &SharedState,
    session: &Session,
    question_index: Option<usize>,
) {
    let payload = LeaderboardUpdate {
        question_index,
        leaderboard: session.leaderboard(),
    };
    broadcast(state, session.id, EventName::LeaderboardUpdate, &payload);
}

pub fn broadcast_game_over(state: &SharedState, session: &Session, reason: GameOverReason) {
    let payload = GameOver {
        reason,
        leaderboard: session.leaderboard(),
    };
    broadcast(state, session.id, EventName::GameOver, &payload);
}

/// Tell the group that a player went offline or came back.
pub fn broadcast_player_presence(state: &SharedState, session: &Session, user_id: &str) {
    let Some(player) = session.player(user_id) else {
        return;
    };
    let payload = PlayerPresence {
        user_id: player.user_id.clone(),
        display_name: player.display_name.clone(),
        is_connected: player.is_connected,
    };
    broadcast(state, session.id, EventName::PlayerPresence, &payload);
}

/// Dedicated error event for a rejected answer, sent to the submitter only.
pub fn send_answer_error(
    tx: &mpsc::UnboundedSender<Message>,
    session_id: Uuid,
    question_index: usize,
    err: &ServiceError,
) -> Result<(), ConnectionClosed> {
    let payload = AnswerError {
        question_index,
        code: err.code().into(),
        message: err.client_message(),
    };
    send_event(tx, session_id, EventName::AnswerError, &payload)
}
