use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collaborative session as persisted by the document store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    pub id: Uuid,
    pub name: String,
    pub language: String,
    /// Last explicitly saved code buffer
    pub code: String,
    pub messages: Vec<ChatMessageData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One live connection in a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ParticipantData {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
}

/// A single edit to the shared buffer.
///
/// Only `Replace` is safe without a shared revision counter. `Insert` and
/// `Delete` address character offsets and assume every participant holds an
/// identical buffer, which the relay does not guarantee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeChange {
    Replace { content: String },
    Insert { position: usize, text: String },
    Delete { position: usize, length: usize },
}

impl CodeChange {
    /// Apply the change to a local buffer. Offsets are in characters and are
    /// clamped to the buffer length.
    pub fn apply(&self, buffer: &mut String) {
        match self {
            CodeChange::Replace { content } => {
                buffer.clear();
                buffer.push_str(content);
            }
            CodeChange::Insert { position, text } => {
                let at = byte_offset(buffer, *position);
                buffer.insert_str(at, text);
            }
            CodeChange::Delete { position, length } => {
                let start = byte_offset(buffer, *position);
                let end = byte_offset(buffer, position.saturating_add(*length));
                buffer.replace_range(start..end, "");
            }
        }
    }

    /// Size of the payload carried by this change, in bytes
    pub fn payload_len(&self) -> usize {
        match self {
            CodeChange::Replace { content } => content.len(),
            CodeChange::Insert { text, .. } => text.len(),
            CodeChange::Delete { .. } => 0,
        }
    }
}

fn byte_offset(buffer: &str, chars: usize) -> usize {
    buffer
        .char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(buffer.len())
}

/// Code change as fanned out to the other members of a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeChangeEvent {
    pub session_id: Uuid,
    /// Connection that produced the change
    pub sender_id: Uuid,
    pub user_id: Uuid,
    pub change: CodeChange,
    /// Opaque to the relay; reserved for stale-revision rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Ephemeral cursor position, never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorEvent {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    User,
    Ai,
}

/// Chat message. Append-only: never edited or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessageData {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub kind: ChatKind,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// WebRTC signaling message addressed to exactly one connection.
/// The payload (SDP or ICE candidate) is forwarded without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingEnvelope {
    pub kind: SignalKind,
    pub sender_id: Uuid,
    pub target_id: Uuid,
    pub payload: String,
}

/// ICE server configuration for WebRTC
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}
