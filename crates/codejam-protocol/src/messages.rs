use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::{
    ChatMessageData, CodeChange, CodeChangeEvent, CursorEvent, IceServer, ParticipantData,
    SessionData, SignalKind, SignalingEnvelope,
};

/// Messages sent from client to server via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with a token issued by the identity provider
    Authenticate { token: String },

    /// Join a session, creating it if it does not exist yet
    Join { session_id: Uuid },

    /// Leave a session without disconnecting
    Leave { session_id: Uuid },

    /// Edit to the shared buffer
    CodeChange {
        session_id: Uuid,
        change: CodeChange,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<u64>,
    },

    CursorMove {
        session_id: Uuid,
        line: u32,
        column: u32,
    },

    ChatMessage { session_id: Uuid, text: String },

    /// WebRTC offer for one peer
    WebrtcOffer {
        session_id: Uuid,
        sdp: String,
        target_id: Uuid,
    },

    /// WebRTC answer for one peer
    WebrtcAnswer { sdp: String, target_id: Uuid },

    /// WebRTC ICE candidate for one peer
    WebrtcIceCandidate { candidate: String, target_id: Uuid },

    /// Persist the current buffer as the session snapshot
    SaveSnapshot { session_id: Uuid, code: String },

    /// Ping to keep connection alive
    Ping,
}

/// Size limits enforced on inbound messages before they are relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_code_bytes: usize,
    pub max_chat_chars: usize,
    pub max_signal_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_code_bytes: 1024 * 1024,
            max_chat_chars: 4000,
            max_signal_bytes: 64 * 1024,
        }
    }
}

impl ClientMessage {
    /// Reject messages with missing or oversized fields before they reach
    /// any other participant.
    pub fn validate(&self, limits: &Limits) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::Authenticate { token } => require("token", token),
            ClientMessage::Join { .. }
            | ClientMessage::Leave { .. }
            | ClientMessage::CursorMove { .. }
            | ClientMessage::Ping => Ok(()),
            ClientMessage::CodeChange { change, .. } => {
                if change.payload_len() > limits.max_code_bytes {
                    return Err(ProtocolError::TooLarge {
                        field: "change",
                        limit: limits.max_code_bytes,
                    });
                }
                Ok(())
            }
            ClientMessage::ChatMessage { text, .. } => {
                if text.trim().is_empty() {
                    return Err(ProtocolError::MissingField("text"));
                }
                if text.chars().count() > limits.max_chat_chars {
                    return Err(ProtocolError::TooLarge {
                        field: "text",
                        limit: limits.max_chat_chars,
                    });
                }
                Ok(())
            }
            ClientMessage::WebrtcOffer { sdp, .. } | ClientMessage::WebrtcAnswer { sdp, .. } => {
                require("sdp", sdp)?;
                max_len("sdp", sdp, limits.max_signal_bytes)
            }
            ClientMessage::WebrtcIceCandidate { candidate, .. } => {
                require("candidate", candidate)?;
                max_len("candidate", candidate, limits.max_signal_bytes)
            }
            ClientMessage::SaveSnapshot { code, .. } => {
                max_len("code", code, limits.max_code_bytes)
            }
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.is_empty() {
        Err(ProtocolError::MissingField(field))
    } else {
        Ok(())
    }
}

fn max_len(field: &'static str, value: &str, limit: usize) -> Result<(), ProtocolError> {
    if value.len() > limit {
        Err(ProtocolError::TooLarge { field, limit })
    } else {
        Ok(())
    }
}

/// Messages sent from server to client via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication successful
    Authenticated {
        connection_id: Uuid,
        ice_servers: Vec<IceServer>,
    },

    /// Error message
    Error { message: String },

    /// Pong response to ping
    Pong,

    /// Join acknowledged. `session` is the last persisted snapshot; the relay
    /// keeps no replay buffer.
    Joined {
        session: SessionData,
        members: Vec<ParticipantData>,
    },

    /// Another connection joined a session we are in
    UserJoined {
        user_id: Uuid,
        display_name: String,
        connection_id: Uuid,
    },

    /// A connection left a session we are in
    UserLeft { connection_id: Uuid },

    CodeChange { event: CodeChangeEvent },

    CursorMove { event: CursorEvent },

    ChatMessage { message: ChatMessageData },

    /// WebRTC offer from another connection
    WebrtcOffer { sdp: String, sender_id: Uuid },

    /// WebRTC answer from another connection
    WebrtcAnswer { sdp: String, sender_id: Uuid },

    /// WebRTC ICE candidate from another connection
    WebrtcIceCandidate { candidate: String, sender_id: Uuid },

    /// Snapshot saved on behalf of this connection
    SnapshotSaved {
        session_id: Uuid,
        saved_at: DateTime<Utc>,
    },

    /// A write to the store failed. Live delivery was not affected.
    PersistenceFailed { session_id: Uuid, reason: String },

    /// Server is going away; reconnect later
    ServerShutdown,
}

impl From<SignalingEnvelope> for ServerMessage {
    fn from(envelope: SignalingEnvelope) -> Self {
        let SignalingEnvelope {
            kind,
            sender_id,
            payload,
            ..
        } = envelope;
        match kind {
            SignalKind::Offer => ServerMessage::WebrtcOffer {
                sdp: payload,
                sender_id,
            },
            SignalKind::Answer => ServerMessage::WebrtcAnswer {
                sdp: payload,
                sender_id,
            },
            SignalKind::IceCandidate => ServerMessage::WebrtcIceCandidate {
                candidate: payload,
                sender_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let raw = json!({
            "type": "webrtc_ice_candidate",
            "candidate": "candidate:1 1 UDP 2122252543 10.0.0.1 50000 typ host",
            "target_id": Uuid::nil(),
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        assert!(matches!(msg, ClientMessage::WebrtcIceCandidate { .. }));
    }

    #[test]
    fn code_change_without_revision_parses() {
        let raw = json!({
            "type": "code_change",
            "session_id": Uuid::nil(),
            "change": { "kind": "replace", "content": "let x=1" },
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMessage::CodeChange { revision, change, .. } => {
                assert_eq!(revision, None);
                assert_eq!(
                    change,
                    CodeChange::Replace {
                        content: "let x=1".to_string()
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_required_field_fails_to_parse() {
        let raw = json!({ "type": "webrtc_answer", "target_id": Uuid::nil() });
        assert!(serde_json::from_value::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn empty_chat_text_is_rejected() {
        let msg = ClientMessage::ChatMessage {
            session_id: Uuid::new_v4(),
            text: "   ".to_string(),
        };
        assert_eq!(
            msg.validate(&Limits::default()),
            Err(ProtocolError::MissingField("text"))
        );
    }

    #[test]
    fn oversized_code_change_is_rejected() {
        let limits = Limits {
            max_code_bytes: 4,
            ..Limits::default()
        };
        let msg = ClientMessage::CodeChange {
            session_id: Uuid::new_v4(),
            change: CodeChange::Replace {
                content: "let x=1".to_string(),
            },
            revision: None,
        };
        assert!(matches!(
            msg.validate(&limits),
            Err(ProtocolError::TooLarge { field: "change", .. })
        ));
    }

    #[test]
    fn empty_sdp_is_rejected() {
        let msg = ClientMessage::WebrtcOffer {
            session_id: Uuid::new_v4(),
            sdp: String::new(),
            target_id: Uuid::new_v4(),
        };
        assert_eq!(
            msg.validate(&Limits::default()),
            Err(ProtocolError::MissingField("sdp"))
        );
    }

    #[test]
    fn envelope_keeps_sender_and_payload() {
        let sender_id = Uuid::new_v4();
        let msg: ServerMessage = SignalingEnvelope {
            kind: SignalKind::Answer,
            sender_id,
            target_id: Uuid::new_v4(),
            payload: "v=0".to_string(),
        }
        .into();
        assert_eq!(
            msg,
            ServerMessage::WebrtcAnswer {
                sdp: "v=0".to_string(),
                sender_id
            }
        );
    }
}
