use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quiz backend.
///
/// The WebSocket protocol is documented through its frame schemas.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::sessions::get_leaderboard,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::ws::ClientCommand,
            crate::dto::ws::CommandKind,
            crate::dto::ws::ServerFrame,
            crate::dto::ws::ResponseEnvelope,
            crate::dto::ws::WireError,
            crate::dto::ws::EventFrame,
            crate::dto::ws::EventName,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::QuestionInput,
            crate::dto::session::SessionCreated,
            crate::dto::session::SessionSnapshot,
            crate::dto::session::QuestionView,
            crate::dto::session::PlayerView,
            crate::dto::session::AnswerAck,
            crate::dto::session::ProgressAck,
            crate::dto::session::LeaderboardView,
            crate::dto::session::LobbyUpdate,
            crate::dto::session::GameStarted,
            crate::dto::session::LeaderboardUpdate,
            crate::dto::session::GameOver,
            crate::dto::session::GameOverReason,
            crate::dto::session::PlayerPresence,
            crate::dto::session::AnswerError,
            crate::state::leaderboard::LeaderboardEntry,
            crate::state::state_machine::SessionStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "quiz", description = "WebSocket quiz protocol"),
        (name = "sessions", description = "Read-only session endpoints"),
    )
)]
pub struct ApiDoc;
