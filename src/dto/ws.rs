use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dto::session::CreateSessionRequest, error::ServiceError};

/// Closed set of commands a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    CreateSession,
    HostSession,
    JoinSession,
    StartGame,
    SubmitAnswer,
    NextQuestion,
    EndGame,
    GetLeaderboard,
    ReconnectSession,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::CreateSession => "create_session",
            CommandKind::HostSession => "host_session",
            CommandKind::JoinSession => "join_session",
            CommandKind::StartGame => "start_game",
            CommandKind::SubmitAnswer => "submit_answer",
            CommandKind::NextQuestion => "next_question",
            CommandKind::EndGame => "end_game",
            CommandKind::GetLeaderboard => "get_leaderboard",
            CommandKind::ReconnectSession => "reconnect_session",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
/// Commands accepted from quiz WebSocket clients. The frame's `type` selects the variant.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    CreateSession(CreateSessionRequest),
    HostSession {
        session_id: Uuid,
    },
    JoinSession {
        join_code: String,
    },
    StartGame {
        session_id: Uuid,
    },
    SubmitAnswer {
        session_id: Uuid,
        question_index: usize,
        option_index: usize,
        elapsed_ms: u64,
    },
    NextQuestion {
        session_id: Uuid,
    },
    EndGame {
        session_id: Uuid,
    },
    GetLeaderboard {
        session_id: Uuid,
    },
    ReconnectSession {
        session_id: Uuid,
    },
}

impl ClientCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            ClientCommand::CreateSession(_) => CommandKind::CreateSession,
            ClientCommand::HostSession { .. } => CommandKind::HostSession,
            ClientCommand::JoinSession { .. } => CommandKind::JoinSession,
            ClientCommand::StartGame { .. } => CommandKind::StartGame,
            ClientCommand::SubmitAnswer { .. } => CommandKind::SubmitAnswer,
            ClientCommand::NextQuestion { .. } => CommandKind::NextQuestion,
            ClientCommand::EndGame { .. } => CommandKind::EndGame,
            ClientCommand::GetLeaderboard { .. } => CommandKind::GetLeaderboard,
            ClientCommand::ReconnectSession { .. } => CommandKind::ReconnectSession,
        }
    }
}

/// An inbound text frame after decoding.
#[derive(Debug)]
pub struct InboundFrame {
    /// Echoed back in the response so clients can correlate replies.
    pub request_id: Option<String>,
    /// Raw `type` field, kept so undecodable commands can still be answered.
    pub command_name: String,
    pub command: Result<ClientCommand, String>,
}

impl InboundFrame {
    /// Decode a text frame. Only non-JSON input or a missing `type` is a hard failure.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| format!("malformed JSON frame: {err}"))?;
        let command_name = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| "frame has no string `type` field".to_owned())?;
        let request_id = value
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let command = serde_json::from_value::<ClientCommand>(value)
            .map_err(|err| format!("invalid `{command_name}` command: {err}"));

        Ok(Self {
            request_id,
            command_name,
            command,
        })
    }
}

/// Error object embedded in a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl From<&ServiceError> for WireError {
    fn from(err: &ServiceError) -> Self {
        Self {
            code: err.code().into(),
            message: err.client_message(),
        }
    }
}

/// Reply to one command, delivered to the originating channel only.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResponseEnvelope {
    pub command: String,
    pub request_id: Option<String>,
    pub success: bool,
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    pub error: Option<WireError>,
}

impl ResponseEnvelope {
    pub fn ok(command: impl Into<String>, request_id: Option<String>, data: Option<Value>) -> Self {
        Self {
            command: command.into(),
            request_id,
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(
        command: impl Into<String>,
        request_id: Option<String>,
        error: &ServiceError,
    ) -> Self {
        Self {
            command: command.into(),
            request_id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Names of server-pushed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    WaitingLobby,
    GameStarted,
    NewQuestion,
    LeaderboardUpdate,
    GameOver,
    PlayerPresence,
    AnswerError,
}

/// Server-pushed notification about one session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventFrame {
    pub event: EventName,
    pub session_id: Uuid,
    #[schema(value_type = Object)]
    pub data: Value,
}

/// Every frame the server writes to a quiz socket.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Response(ResponseEnvelope),
    Event(EventFrame),
}
