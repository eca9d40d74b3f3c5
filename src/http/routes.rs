//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::RoomSummary;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origins
        .iter()
        .filter_map(|origin| origin.parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/rooms", get(rooms_handler))
        .route("/rooms/:room_id", get(room_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    rooms: usize,
    active_rooms: usize,
    sessions: usize,
    running_loops: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.orchestrator.stats();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        rooms: stats.rooms,
        active_rooms: stats.active_rooms,
        sessions: stats.sessions,
        running_loops: stats.running_loops,
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

async fn rooms_handler(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.orchestrator.rooms_overview())
}

async fn room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSummary>, AppError> {
    let room_id: Uuid = room_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid room id: {}", room_id)))?;

    state
        .orchestrator
        .room_info(room_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Room {} not found", room_id)))
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
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
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
    use crate::config::{Config, GameConfig};
    use crate::game::state::RoomKind;
    use crate::matchmaking::RoomOptions;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".to_string(),
            client_origins: vec!["http://localhost:8443".to_string()],
            jwt_secret: None,
            result_store_url: None,
            result_store_key: None,
            game: GameConfig::default(),
        })
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let state = test_state();
        state.orchestrator.create_room(RoomKind::Two, RoomOptions::default());

        let (status, body) = get(build_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rooms"], 1);
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn rooms_are_listed_and_looked_up() {
        let state = test_state();
        let room_id = state
            .orchestrator
            .create_room(RoomKind::Four, RoomOptions::default());

        let (status, body) = get(build_router(state.clone()), "/rooms").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        let (status, body) = get(build_router(state.clone()), &format!("/rooms/{}", room_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "four");
        assert_eq!(body["maxPlayers"], 4);
    }

    #[tokio::test]
    async fn unknown_or_malformed_room_ids_are_errors() {
        let state = test_state();

        let (status, body) =
            get(build_router(state.clone()), &format!("/rooms/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let (status, _) = get(build_router(state), "/rooms/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
