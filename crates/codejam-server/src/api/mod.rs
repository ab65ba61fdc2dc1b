mod sessions;

use crate::state::AppState;
use crate::ws;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Session routes
        .route("/api/sessions", post(sessions::create_session))
        .route("/api/sessions/{id}", get(sessions::get_session))
        .route("/api/sessions/{id}/code", put(sessions::save_code))
        .route("/api/sessions/{id}/messages", get(sessions::list_messages))
        .route("/api/sessions/{id}/members", get(sessions::list_members))
        .route("/api/sessions/{id}/assist", post(sessions::assist))
        // WebRTC signaling
        .route("/api/rtc/ice-servers", get(crate::webrtc::get_ice_servers))
        // WebSocket endpoint
        .route("/ws", get(ws::handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
