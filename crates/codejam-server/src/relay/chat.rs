use crate::state::AppState;
use chrono::Utc;
use codejam_protocol::{ChatKind, ChatMessageData, ParticipantData, ServerMessage};
use uuid::Uuid;

pub const AI_DISPLAY_NAME: &str = "AI Assistant";

/// Relay a chat message typed by a participant. Identity fields come from
/// the authenticated connection, never from the client payload.
pub async fn on_chat_message(
    state: &AppState,
    sender: &ParticipantData,
    session_id: Uuid,
    text: String,
) -> Option<ChatMessageData> {
    if !state
        .registry
        .is_member(session_id, sender.connection_id)
        .await
    {
        tracing::warn!(
            "Dropping chat message from {} for session {} it has not joined",
            sender.connection_id,
            session_id
        );
        return None;
    }

    let message = ChatMessageData {
        id: Uuid::new_v4(),
        session_id,
        user_id: sender.user_id,
        display_name: sender.display_name.clone(),
        kind: ChatKind::User,
        text,
        created_at: Utc::now(),
    };

    publish(state, message.clone(), Some(sender.connection_id)).await;
    Some(message)
}

/// Build an assistant reply for a session
pub fn ai_message(session_id: Uuid, text: String) -> ChatMessageData {
    ChatMessageData {
        id: Uuid::new_v4(),
        session_id,
        user_id: Uuid::nil(),
        display_name: AI_DISPLAY_NAME.to_string(),
        kind: ChatKind::Ai,
        text,
        created_at: Utc::now(),
    }
}

/// Deliver to the whole session, sender included, then queue the append.
/// A failed append never undoes the delivery.
pub async fn publish(state: &AppState, message: ChatMessageData, acting: Option<Uuid>) {
    state
        .registry
        .broadcast(
            message.session_id,
            &ServerMessage::ChatMessage {
                message: message.clone(),
            },
            None,
        )
        .await;

    state.persister.chat(message, acting).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, Result};
    use crate::relay::testing::{connect, join, state_with_store, test_state};
    use crate::services::memory::InMemorySessionStore;
    use crate::services::store::SessionStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use codejam_protocol::SessionData;
    use std::sync::Arc;

    /// Serves sessions but refuses every write
    struct ReadOnlyStore(InMemorySessionStore);

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn create_session(&self, name: &str, language: &str) -> Result<SessionData> {
            self.0.create_session(name, language).await
        }

        async fn create_session_with_id(
            &self,
            id: Uuid,
            name: &str,
            language: &str,
        ) -> Result<SessionData> {
            self.0.create_session_with_id(id, name, language).await
        }

        async fn get_session(&self, id: Uuid) -> Result<SessionData> {
            self.0.get_session(id).await
        }

        async fn append_chat_message(&self, _: Uuid, _: &ChatMessageData) -> Result<()> {
            Err(AppError::Internal(anyhow::anyhow!("disk full")))
        }

        async fn save_code_snapshot(&self, _: Uuid, _: &str) -> Result<DateTime<Utc>> {
            Err(AppError::Internal(anyhow::anyhow!("disk full")))
        }

        async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessageData>> {
            self.0.list_messages(session_id).await
        }
    }

    #[tokio::test]
    async fn sender_sees_own_message_and_it_is_persisted() {
        let state = test_state();
        let session = Uuid::new_v4();
        let mut a = connect(&state, "a").await;
        let mut b = connect(&state, "b").await;
        join(&state, session, &mut a).await;
        join(&state, session, &mut b).await;
        a.drain();

        let sent = on_chat_message(&state, &a.participant, session, "hi".to_string())
            .await
            .unwrap();

        for client in [&mut a, &mut b] {
            assert_eq!(
                client.recv().await,
                ServerMessage::ChatMessage {
                    message: sent.clone()
                }
            );
        }

        // Persisted behind the broadcast
        let mut stored = vec![];
        for _ in 0..50 {
            stored = state.store.list_messages(session).await.unwrap();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(stored, vec![sent]);
    }

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let state = test_state();
        let session = Uuid::new_v4();
        let mut a = connect(&state, "a").await;
        let mut b = connect(&state, "b").await;
        join(&state, session, &mut a).await;
        join(&state, session, &mut b).await;

        for text in ["m1", "m2", "m3"] {
            on_chat_message(&state, &a.participant, session, text.to_string()).await;
        }

        let texts: Vec<_> = b
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::ChatMessage { message } => Some(message.text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn persistence_failure_still_delivers() {
        let state = state_with_store(Arc::new(ReadOnlyStore(InMemorySessionStore::new())));
        let session = Uuid::new_v4();
        let mut a = connect(&state, "a").await;
        let mut b = connect(&state, "b").await;
        join(&state, session, &mut a).await;
        join(&state, session, &mut b).await;
        a.drain();

        on_chat_message(&state, &a.participant, session, "hi".to_string()).await;

        assert!(matches!(b.recv().await, ServerMessage::ChatMessage { .. }));
        assert!(matches!(a.recv().await, ServerMessage::ChatMessage { .. }));
        assert!(matches!(
            a.recv().await,
            ServerMessage::PersistenceFailed { session_id, .. } if session_id == session
        ));
        // Only the acting client hears about the failure
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn non_member_chat_is_dropped() {
        let state = test_state();
        let session = Uuid::new_v4();
        let a = connect(&state, "a").await;
        let mut b = connect(&state, "b").await;
        join(&state, session, &mut b).await;

        assert!(
            on_chat_message(&state, &a.participant, session, "hi".to_string())
                .await
                .is_none()
        );
        assert!(b.drain().is_empty());
    }
}
