//! Quiz engine commands: each operation resolves the session, applies one state
//! machine step under the session lock, persists it and fans out the resulting events.

use axum::extract::ws::Message;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::SessionEntity,
    dto::{
        session::{
            AnswerAck, CreateSessionRequest, GameOverReason, LeaderboardView, ProgressAck,
            SessionCreated, SessionSnapshot,
        },
        validation::normalize_join_code,
    },
    error::ServiceError,
    services::{events, gate::Identity},
    state::{
        SharedState,
        presence::{Attachment, ChannelHandle, ChannelId},
        session::{AdvanceOutcome, JoinOutcome, Session},
        transitions::{load_session, run_session_command, with_persistence_timeout},
    },
};

/// Unambiguous join code alphabet: no `0/O` or `1/I`.
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Fresh codes tried before giving up on `create_session`.
const JOIN_CODE_ATTEMPTS: usize = 8;

/// An admitted channel together with the identity verified at the gate.
#[derive(Clone, Debug)]
pub struct Caller {
    pub identity: Identity,
    pub channel: ChannelHandle,
}

impl Caller {
    /// Bind a fresh channel id to `identity`.
    pub fn new(identity: Identity, tx: mpsc::UnboundedSender<Message>) -> Self {
        let channel = ChannelHandle {
            id: Uuid::new_v4(),
            user_id: identity.user_id.clone(),
            tx,
        };
        Self { identity, channel }
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.id
    }
}

/// Random join code of `length` characters.
pub fn generate_join_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Create a lobby hosted by the caller and attach the caller's channel to it.
pub async fn create_session(
    state: &SharedState,
    caller: &Caller,
    request: CreateSessionRequest,
) -> Result<SessionCreated, ServiceError> {
    request.validate()?;
    let store = state.require_session_store().await?;

    let title = request.title.trim().to_owned();
    let questions: Vec<_> = request.questions.into_iter().map(Into::into).collect();

    let mut attempt = 1;
    let session = loop {
        let join_code = generate_join_code(state.config().join_code_length());
        let session = Session::new(
            title.clone(),
            questions.clone(),
            caller.user_id().to_owned(),
            join_code,
        );
        let entity: SessionEntity = session.clone().into();

        match with_persistence_timeout(state, "create_session", store.create_session(entity)).await
        {
            Ok(()) => break session,
            Err(ServiceError::PersistenceConflict(reason)) if attempt < JOIN_CODE_ATTEMPTS => {
                warn!(
                    attempt,
                    join_code = %session.join_code,
                    reason,
                    "join code collision; regenerating"
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    };

    let guard = state.lock_session(session.id).await;
    let attachment = state.membership().register(session.id, caller.channel.clone());
    events::broadcast_waiting_lobby(state, &session);
    drop(guard);

    info!(
        session_id = %session.id,
        join_code = %session.join_code,
        host_id = %session.host_id,
        questions = session.questions.len(),
        "session created"
    );
    settle_attachment(state, caller, session.id, attachment).await;

    Ok(SessionCreated {
        session_id: session.id,
        join_code: session.join_code,
    })
}

/// Attach the host's channel to an existing session (host reconnect).
pub async fn host_session(
    state: &SharedState,
    caller: &Caller,
    session_id: Uuid,
) -> Result<SessionSnapshot, ServiceError> {
    let guard = state.lock_session(session_id).await;
    let session = load_session(state, session_id).await?;
    if !session.is_host(caller.user_id()) {
        return Err(ServiceError::NotHost);
    }

    let attachment = state.membership().register(session_id, caller.channel.clone());
    drop(guard);
    info!(session_id = %session_id, host_id = %caller.user_id(), "host attached");
    settle_attachment(state, caller, session_id, attachment).await;
    Ok(SessionSnapshot::for_viewer(&session, caller.user_id()))
}

/// Join by code. New players are admitted in the lobby; returning players in any phase.
pub async fn join_session(
    state: &SharedState,
    caller: &Caller,
    join_code: &str,
) -> Result<SessionSnapshot, ServiceError> {
    let code = normalize_join_code(join_code)
        .ok_or_else(|| ServiceError::InvalidInput(format!("malformed join code `{join_code}`")))?;
    let store = state.require_session_store().await?;
    let session_id = with_persistence_timeout(
        state,
        "find_session_by_join_code",
        store.find_session_by_join_code(code),
    )
    .await?
    .map(|entity| entity.id)
    .ok_or(ServiceError::SessionNotFound)?;

    let user_id = caller.user_id();
    let display_name = caller.identity.display_name.as_str();
    let channel_id = caller.channel_id();
    let committed = run_session_command(state, session_id, |session| {
        session.join(user_id, display_name, channel_id)
    })
    .await?;

    let attachment = state.membership().register(session_id, caller.channel.clone());
    match committed.value {
        JoinOutcome::Joined => {
            info!(session_id = %session_id, user_id, "player joined");
            events::broadcast_waiting_lobby(state, &committed.session);
        }
        JoinOutcome::Rejoined => {
            info!(session_id = %session_id, user_id, "player rejoined");
            events::broadcast_player_presence(state, &committed.session, user_id);
        }
    }

    let snapshot = SessionSnapshot::for_viewer(&committed.session, user_id);
    drop(committed);
    settle_attachment(state, caller, session_id, attachment).await;
    Ok(snapshot)
}

/// Host moves the lobby to the first question.
pub async fn start_game(
    state: &SharedState,
    caller: &Caller,
    session_id: Uuid,
) -> Result<(), ServiceError> {
    ensure_attached(state, caller, session_id)?;
    let user_id = caller.user_id();
    let committed = run_session_command(state, session_id, |session| session.start(user_id)).await?;

    info!(
        session_id = %session_id,
        players = committed.session.players().len(),
        "game started"
    );
    events::broadcast_game_started(state, &committed.session);
    events::broadcast_new_question(state, &committed.session);
    Ok(())
}

/// Score one answer of the caller and publish the new standings.
pub async fn submit_answer(
    state: &SharedState,
    caller: &Caller,
    session_id: Uuid,
    question_index: usize,
    option_index: usize,
    elapsed_ms: u64,
) -> Result<AnswerAck, ServiceError> {
    ensure_attached(state, caller, session_id)?;
    let user_id = caller.user_id();
    let policy = *state.config().scoring();
    let committed = run_session_command(state, session_id, |session| {
        session.submit_answer(user_id, question_index, option_index, elapsed_ms, &policy)
    })
    .await?;

    events::broadcast_leaderboard_update(state, &committed.session, Some(question_index));
    Ok(AnswerAck::new(question_index, committed.value))
}

/// Host opens the next question, or finishes the game after the last one.
pub async fn next_question(
    state: &SharedState,
    caller: &Caller,
    session_id: Uuid,
) -> Result<ProgressAck, ServiceError> {
    ensure_attached(state, caller, session_id)?;
    let user_id = caller.user_id();
    let committed =
        run_session_command(state, session_id, |session| session.advance(user_id)).await?;

    match committed.value {
        AdvanceOutcome::NextQuestion(index) => {
            info!(session_id = %session_id, question_index = index, "question opened");
            events::broadcast_new_question(state, &committed.session);
        }
        AdvanceOutcome::Finished => {
            info!(session_id = %session_id, "last question passed; game over");
            events::broadcast_game_over(state, &committed.session, GameOverReason::Completed);
        }
    }
    Ok(ProgressAck::from(&committed.session))
}

/// Host ends the game immediately.
pub async fn end_game(
    state: &SharedState,
    caller: &Caller,
    session_id: Uuid,
) -> Result<(), ServiceError> {
    ensure_attached(state, caller, session_id)?;
    let user_id = caller.user_id();
    let committed = run_session_command(state, session_id, |session| session.end(user_id)).await?;

    info!(session_id = %session_id, "game ended by host");
    events::broadcast_game_over(state, &committed.session, GameOverReason::EndedByHost);
    Ok(())
}

/// Current ranked list. Read-only, available in every phase.
pub async fn get_leaderboard(
    state: &SharedState,
    session_id: Uuid,
) -> Result<LeaderboardView, ServiceError> {
    let session = load_session(state, session_id).await?;
    Ok(LeaderboardView::from(&session))
}

/// Rebind the caller to a session it already belongs to and replay its full state.
///
/// Works for ended sessions so the final standings can still be fetched.
pub async fn reconnect_session(
    state: &SharedState,
    caller: &Caller,
    session_id: Uuid,
) -> Result<SessionSnapshot, ServiceError> {
    let user_id = caller.user_id();

    let session = load_session(state, session_id).await?;
    if session.is_host(user_id) {
        return host_session(state, caller, session_id).await;
    }

    let channel_id = caller.channel_id();
    let committed = run_session_command(state, session_id, |session| {
        session.reconnect(user_id, channel_id)
    })
    .await?;

    let attachment = state.membership().register(session_id, caller.channel.clone());
    info!(session_id = %session_id, user_id, "player reconnected");
    events::broadcast_player_presence(state, &committed.session, user_id);

    let snapshot = SessionSnapshot::for_viewer(&committed.session, user_id);
    drop(committed);
    settle_attachment(state, caller, session_id, attachment).await;
    Ok(snapshot)
}

/// Forget a closed channel and mark its player offline.
///
/// Best effort: failures are logged, never surfaced. Scores and answers are kept.
pub async fn disconnect(state: &SharedState, caller: &Caller) {
    let Some(session_id) = state.membership().remove_channel(caller.channel_id()) else {
        return;
    };
    record_disconnect(state, caller, session_id).await;
}

/// Finish a successful attach once the target session lock is released: the
/// session the channel moved away from sees its player go offline.
async fn settle_attachment(
    state: &SharedState,
    caller: &Caller,
    session_id: Uuid,
    attachment: Attachment,
) {
    for channel_id in &attachment.superseded {
        info!(
            session_id = %session_id,
            user_id = %caller.user_id(),
            channel_id = %channel_id,
            "older channel superseded"
        );
    }
    if let Some(left) = attachment.left_session {
        info!(
            from = %left,
            to = %session_id,
            channel_id = %caller.channel_id(),
            "channel moved to another session"
        );
        record_disconnect(state, caller, left).await;
    }
}

/// Mark the caller's player offline in `session_id` if this channel is still its binding.
async fn record_disconnect(state: &SharedState, caller: &Caller, session_id: Uuid) {
    let channel_id = caller.channel_id();
    let user_id = caller.user_id();

    let result = run_session_command(state, session_id, |session| {
        Ok(session.disconnect(user_id, channel_id))
    })
    .await;

    match result {
        Ok(committed) if committed.value => {
            info!(session_id = %session_id, user_id, channel_id = %channel_id, "player disconnected");
            events::broadcast_player_presence(state, &committed.session, user_id);
        }
        Ok(_) => {}
        Err(err) => warn!(
            session_id = %session_id,
            user_id,
            error = %err,
            "failed to record disconnect"
        ),
    }
}

/// Mutating commands only act on the session the channel is attached to.
fn ensure_attached(
    state: &SharedState,
    caller: &Caller,
    session_id: Uuid,
) -> Result<(), ServiceError> {
    match state.membership().session_of(caller.channel_id()) {
        Some(bound) if bound == session_id => Ok(()),
        _ => Err(ServiceError::InvalidState(format!(
            "channel is not attached to session `{session_id}`"
        ))),
    }
}
