use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    dto::ws::{ClientCommand, InboundFrame, ResponseEnvelope},
    error::ServiceError,
    services::{events, gate::Identity, session_service, session_service::Caller},
    state::SharedState,
};

/// Command name echoed when a frame could not be decoded at all.
const UNPARSEABLE_COMMAND: &str = "unknown";

/// Handle the full lifecycle of one admitted quiz WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let caller = Caller::new(identity, outbound_tx.clone());
    info!(
        user_id = %caller.user_id(),
        channel_id = %caller.channel_id(),
        "quiz channel connected"
    );

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(channel_id = %caller.channel_id(), payload = %text, "received frame");
                let frame = match InboundFrame::parse(text.as_str()) {
                    Ok(frame) => frame,
                    Err(reason) => {
                        let envelope = ResponseEnvelope::failure(
                            UNPARSEABLE_COMMAND,
                            None,
                            &ServiceError::InvalidInput(reason),
                        );
                        if events::send_response(&outbound_tx, envelope).is_err() {
                            break;
                        }
                        continue;
                    }
                };

                // The command runs to completion even if this channel drops meanwhile.
                let task = tokio::spawn(dispatch(state.clone(), caller.clone(), frame));
                if let Err(err) = task.await {
                    error!(channel_id = %caller.channel_id(), error = %err, "command task failed");
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(channel_id = %caller.channel_id(), "quiz channel closed by client");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                let envelope = ResponseEnvelope::failure(
                    UNPARSEABLE_COMMAND,
                    None,
                    &ServiceError::InvalidInput("binary frames are not supported".into()),
                );
                if events::send_response(&outbound_tx, envelope).is_err() {
                    break;
                }
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(channel_id = %caller.channel_id(), error = %err, "websocket error");
                break;
            }
        }
    }

    session_service::disconnect(&state, &caller).await;
    info!(
        user_id = %caller.user_id(),
        channel_id = %caller.channel_id(),
        "quiz channel disconnected"
    );

    // The caller holds a sender clone; the writer only stops once every sender is gone.
    drop(caller);
    finalize(writer_task, outbound_tx).await;
}

/// Route one decoded frame to its handler and reply on the originating channel.
pub async fn dispatch(state: SharedState, caller: Caller, frame: InboundFrame) {
    let InboundFrame {
        request_id,
        command_name,
        command,
    } = frame;

    let command = match command {
        Ok(command) => command,
        Err(reason) => {
            reply(
                &caller,
                &command_name,
                request_id,
                Err(ServiceError::InvalidInput(reason)),
            );
            return;
        }
    };

    let kind = command.kind();
    let result = match command {
        ClientCommand::CreateSession(request) => {
            to_data(session_service::create_session(&state, &caller, request).await)
        }
        ClientCommand::HostSession { session_id } => {
            to_data(session_service::host_session(&state, &caller, session_id).await)
        }
        ClientCommand::JoinSession { join_code } => {
            to_data(session_service::join_session(&state, &caller, &join_code).await)
        }
        ClientCommand::StartGame { session_id } => {
            no_data(session_service::start_game(&state, &caller, session_id).await)
        }
        ClientCommand::SubmitAnswer {
            session_id,
            question_index,
            option_index,
            elapsed_ms,
        } => {
            let result = session_service::submit_answer(
                &state,
                &caller,
                session_id,
                question_index,
                option_index,
                elapsed_ms,
            )
            .await;
            if let Err(err) = &result {
                let _ = events::send_answer_error(&caller.channel.tx, session_id, question_index, err);
            }
            to_data(result)
        }
        ClientCommand::NextQuestion { session_id } => {
            to_data(session_service::next_question(&state, &caller, session_id).await)
        }
        ClientCommand::EndGame { session_id } => {
            no_data(session_service::end_game(&state, &caller, session_id).await)
        }
        ClientCommand::GetLeaderboard { session_id } => {
            to_data(session_service::get_leaderboard(&state, session_id).await)
        }
        ClientCommand::ReconnectSession { session_id } => {
            to_data(session_service::reconnect_session(&state, &caller, session_id).await)
        }
    };

    reply(&caller, kind.as_str(), request_id, result);
}

fn to_data<T: Serialize>(result: Result<T, ServiceError>) -> Result<Option<Value>, ServiceError> {
    let value = result?;
    serde_json::to_value(value)
        .map(Some)
        .map_err(|err| ServiceError::Internal(format!("failed to serialize response: {err}")))
}

fn no_data(result: Result<(), ServiceError>) -> Result<Option<Value>, ServiceError> {
    result.map(|()| None)
}

fn reply(
    caller: &Caller,
    command: &str,
    request_id: Option<String>,
    result: Result<Option<Value>, ServiceError>,
) {
    let envelope = match result {
        Ok(data) => ResponseEnvelope::ok(command, request_id, data),
        Err(err) => {
            match &err {
                ServiceError::Internal(_) | ServiceError::Unavailable(_) => error!(
                    command,
                    user_id = %caller.user_id(),
                    error = %err,
                    "command failed"
                ),
                _ => debug!(
                    command,
                    user_id = %caller.user_id(),
                    error = %err,
                    "command rejected"
                ),
            }
            ResponseEnvelope::failure(command, request_id, &err)
        }
    };

    if events::send_response(&caller.channel.tx, envelope).is_err() {
        debug!(
            command,
            channel_id = %caller.channel_id(),
            "reply dropped; channel closed"
        );
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
