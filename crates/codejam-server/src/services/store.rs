//! Document store boundary. The persisted session is owned by the store;
//! the relay core only mirrors live membership.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codejam_protocol::{ChatMessageData, SessionData};
use uuid::Uuid;

pub const DEFAULT_SESSION_NAME: &str = "Untitled session";
pub const DEFAULT_LANGUAGE: &str = "plaintext";

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, name: &str, language: &str) -> Result<SessionData>;

    /// Create a session under a client-chosen id. Creating an id that
    /// already exists leaves the existing session untouched.
    async fn create_session_with_id(
        &self,
        id: Uuid,
        name: &str,
        language: &str,
    ) -> Result<SessionData>;

    /// Session with its full transcript
    async fn get_session(&self, id: Uuid) -> Result<SessionData>;

    /// Append-only; messages are never updated or deleted
    async fn append_chat_message(&self, session_id: Uuid, message: &ChatMessageData)
        -> Result<()>;

    async fn save_code_snapshot(&self, session_id: Uuid, code: &str) -> Result<DateTime<Utc>>;

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessageData>>;

    /// Fetch a session, creating it with default metadata on first use
    async fn load_or_create(&self, id: Uuid) -> Result<SessionData> {
        match self.get_session(id).await {
            Err(AppError::NotFound(_)) => {
                tracing::info!("Session {} not found, creating it", id);
                self.create_session_with_id(id, DEFAULT_SESSION_NAME, DEFAULT_LANGUAGE)
                    .await
            }
            other => other,
        }
    }
}

pub(crate) fn session_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Session {} not found", id))
}
