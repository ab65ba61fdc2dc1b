use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::{AssistRequest, CreateSession, SaveCode, SnapshotSaved};
use crate::relay::chat;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use codejam_protocol::{ChatMessageData, ParticipantData, SessionData};
use uuid::Uuid;

pub async fn create_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(input): Json<CreateSession>,
) -> Result<(StatusCode, Json<SessionData>)> {
    let name = input.name.trim();
    let language = input.language.trim();
    if name.is_empty() || language.is_empty() {
        return Err(AppError::BadRequest(
            "Session name and language are required".to_string(),
        ));
    }

    let session = state.store.create_session(name, language).await?;
    tracing::info!(
        "User {} created session {} ({})",
        auth.user_id,
        session.id,
        session.language
    );

    Ok((StatusCode::CREATED, Json(session)))
}

/// Persisted snapshot and transcript. Rejoining clients read this instead of
/// expecting the relay to replay anything.
pub async fn get_session(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionData>> {
    Ok(Json(state.store.get_session(id).await?))
}

pub async fn save_code(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(input): Json<SaveCode>,
) -> Result<Json<SnapshotSaved>> {
    if input.code.len() > state.config.limits.max_code_bytes {
        return Err(AppError::BadRequest("Code snapshot is too large".to_string()));
    }

    let saved_at = state.store.save_code_snapshot(id, &input.code).await?;
    tracing::debug!("User {} saved snapshot for session {}", auth.user_id, id);

    Ok(Json(SnapshotSaved {
        session_id: id,
        saved_at,
    }))
}

pub async fn list_messages(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessageData>>> {
    Ok(Json(state.store.list_messages(id).await?))
}

pub async fn list_members(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Json<Vec<ParticipantData>> {
    Json(state.registry.members(id).await)
}

/// Ask the AI service and post its reply into the session chat
pub async fn assist(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(input): Json<AssistRequest>,
) -> Result<Json<ChatMessageData>> {
    let assistant = state
        .assistant
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("AI assist is not configured".to_string()))?;

    if input.prompt.trim().is_empty() {
        return Err(AppError::BadRequest("Prompt is required".to_string()));
    }

    // Make sure the session exists before spending an upstream call on it
    state.store.get_session(id).await?;

    tracing::info!(
        "User {} requested {:?} assist in session {}",
        auth.user_id,
        input.action,
        id
    );

    let text = assistant
        .respond(id, &input.prompt, input.selected_code.as_deref(), input.action)
        .await?;

    let message = chat::ai_message(id, text);
    chat::publish(&state, message.clone(), None).await;

    Ok(Json(message))
}
