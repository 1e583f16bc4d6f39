//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::session::JoinError;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ws/:room", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.client_origin.as_deref()))
        .with_state(state)
}

/// CORS configuration - comma-separated origins, or any origin when unset
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match client_origin {
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
                .collect();
            cors.allow_origin(allowed)
        }
        None => cors.allow_origin(Any),
    }
}

// ============================================================================
// Status endpoints
// ============================================================================

async fn root_handler() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_battles: usize,
    battle_players: usize,
    lobby_members: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_battles: state.battles.active_battles(),
        battle_players: state.battles.total_players(),
        lobby_members: state.matchmaking.session.member_count(),
        queue_size: state.matchmaking.queue_size(),
    })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<JoinError> for AppError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::MatchRequired => AppError::BadRequest(err.to_string()),
            JoinError::MatchNotFound(_) | JoinError::SessionClosed => {
                AppError::NotFound(err.to_string())
            }
            JoinError::SessionFull | JoinError::SeatNotReserved => {
                AppError::Conflict(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_join_errors_map_to_status() {
        let status = |err: JoinError| AppError::from(err).into_response().status();
        assert_eq!(status(JoinError::MatchRequired), StatusCode::BAD_REQUEST);
        assert_eq!(status(JoinError::MatchNotFound(Uuid::new_v4())), StatusCode::NOT_FOUND);
        assert_eq!(status(JoinError::SessionFull), StatusCode::CONFLICT);
    }
}
