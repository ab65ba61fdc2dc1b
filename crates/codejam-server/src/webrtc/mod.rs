use crate::auth::AuthUser;
use crate::state::AppState;
use axum::{extract::State, Json};
use codejam_protocol::IceServer;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// STUN/TURN configuration, passed through to clients untouched
pub async fn get_ice_servers(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Json<IceServersResponse> {
    Json(IceServersResponse {
        ice_servers: state.config.ice_servers(),
    })
}
