//! Codejam Server Library
//!
//! This module exposes the server components for testing and embedding.

pub mod api;
pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod relay;
pub mod services;
pub mod state;
pub mod webrtc;
pub mod ws;

use anyhow::Result;

/// Create and configure the server application
pub async fn create_app(config: state::Config) -> Result<(axum::Router, state::AppState)> {
    let store = db::init_store(config.database_url.as_deref()).await?;
    let app_state = state::AppState::new(config, store)?;
    let router = api::create_router(app_state.clone());
    Ok((router, app_state))
}
