use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, Uri},
    response::IntoResponse,
    routing::get,
};
use tracing::warn;

use crate::{
    error::AppError,
    services::{gate, websocket_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/ws",
    tag = "quiz",
    params(
        ("token" = Option<String>, Query, description = "Bearer token for clients that cannot set the Authorization header"),
    ),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 401, description = "Missing or invalid bearer credential"),
    )
)]
/// Admit the caller through the connection gate, then upgrade to a quiz WebSocket.
pub async fn ws_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let identity = gate::admit(state.verifier(), &headers, &uri).map_err(|err| {
        warn!(error = %err, "websocket connection refused");
        AppError::from(err)
    })?;

    let shared_state = state.clone();
    Ok(ws.on_upgrade(move |socket| {
        websocket_service::handle_socket(shared_state, socket, identity)
    }))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
