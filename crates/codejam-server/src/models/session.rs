use chrono::{DateTime, Utc};
use codejam_protocol::{ChatKind, ChatMessageData, SessionData};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CodeSession {
    pub id: Uuid,
    pub name: String,
    pub language: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CodeSession {
    pub fn into_data(self, messages: Vec<ChatMessageData>) -> SessionData {
        SessionData {
            id: self.id,
            name: self.name,
            language: self.language,
            code: self.code,
            messages,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub kind: MessageKind,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "chat_kind", rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Ai,
}

impl From<ChatKind> for MessageKind {
    fn from(kind: ChatKind) -> Self {
        match kind {
            ChatKind::User => MessageKind::User,
            ChatKind::Ai => MessageKind::Ai,
        }
    }
}

impl From<ChatMessage> for ChatMessageData {
    fn from(row: ChatMessage) -> Self {
        ChatMessageData {
            id: row.id,
            session_id: row.session_id,
            user_id: row.user_id,
            display_name: row.display_name,
            kind: match row.kind {
                MessageKind::User => ChatKind::User,
                MessageKind::Ai => ChatKind::Ai,
            },
            text: row.text,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSession {
    pub name: String,
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveCode {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SnapshotSaved {
    pub session_id: Uuid,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AssistRequest {
    pub prompt: String,
    pub selected_code: Option<String>,
    pub action: AssistAction,
}

/// What the user asked the assistant to do with the selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssistAction {
    #[default]
    Chat,
    Explain,
    Fix,
    Refactor,
    Review,
}
