use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    dto::session::LeaderboardView,
    error::AppError,
    services::{
        gate::{self, Identity},
        session_service,
    },
    state::SharedState,
};

/// Authenticated read-only session endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/sessions/{id}/leaderboard", get(get_leaderboard))
        .route_layer(middleware::from_fn_with_state(state, require_identity))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/leaderboard",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("Authorization" = String, Header, description = "Bearer token"),
    ),
    responses(
        (status = 200, description = "Current ranked list", body = LeaderboardView),
        (status = 401, description = "Missing or invalid bearer credential"),
        (status = 404, description = "Unknown session"),
        (status = 503, description = "Storage unavailable"),
    )
)]
/// Current leaderboard of a session, including ended ones.
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<LeaderboardView>, AppError> {
    debug!(session_id = %id, user_id = %identity.user_id, "leaderboard requested");
    let view = session_service::get_leaderboard(&state, id).await?;
    Ok(Json(view))
}

async fn require_identity(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let identity = gate::admit(state.verifier(), req.headers(), req.uri())?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
