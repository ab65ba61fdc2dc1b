use super::store::{session_not_found, SessionStore};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codejam_protocol::{ChatMessageData, SessionData};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Store used when no database is configured. Contents are lost on restart.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, SessionData>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, name: &str, language: &str) -> Result<SessionData> {
        self.create_session_with_id(Uuid::new_v4(), name, language)
            .await
    }

    async fn create_session_with_id(
        &self,
        id: Uuid,
        name: &str,
        language: &str,
    ) -> Result<SessionData> {
        let now = Utc::now();
        let session = self
            .sessions
            .write()
            .await
            .entry(id)
            .or_insert_with(|| SessionData {
                id,
                name: name.to_string(),
                language: language.to_string(),
                code: String::new(),
                messages: vec![],
                created_at: now,
                updated_at: now,
            })
            .clone();

        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<SessionData> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| session_not_found(id))
    }

    async fn append_chat_message(
        &self,
        session_id: Uuid,
        message: &ChatMessageData,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| session_not_found(session_id))?;

        session.messages.push(message.clone());
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn save_code_snapshot(&self, session_id: Uuid, code: &str) -> Result<DateTime<Utc>> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| session_not_found(session_id))?;

        session.code = code.to_string();
        session.updated_at = Utc::now();
        Ok(session.updated_at)
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessageData>> {
        Ok(self.get_session(session_id).await?.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use codejam_protocol::ChatKind;

    #[tokio::test]
    async fn load_or_create_creates_once() {
        let store = InMemorySessionStore::new();
        let id = Uuid::new_v4();

        let first = store.load_or_create(id).await.unwrap();
        store.save_code_snapshot(id, "let x=1").await.unwrap();
        let second = store.load_or_create(id).await.unwrap();

        assert_eq!(first.id, id);
        assert_eq!(second.code, "let x=1");
    }

    #[tokio::test]
    async fn transcript_keeps_append_order() {
        let store = InMemorySessionStore::new();
        let session = store.create_session("S1", "javascript").await.unwrap();

        for text in ["first", "second"] {
            let message = ChatMessageData {
                id: Uuid::new_v4(),
                session_id: session.id,
                user_id: Uuid::new_v4(),
                display_name: "a".to_string(),
                kind: ChatKind::User,
                text: text.to_string(),
                created_at: Utc::now(),
            };
            store.append_chat_message(session.id, &message).await.unwrap();
        }

        let texts: Vec<_> = store
            .list_messages(session.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn snapshot_for_unknown_session_is_not_found() {
        let store = InMemorySessionStore::new();
        assert!(matches!(
            store.save_code_snapshot(Uuid::new_v4(), "x").await,
            Err(AppError::NotFound(_))
        ));
    }
}
