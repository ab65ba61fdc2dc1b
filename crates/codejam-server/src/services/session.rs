use super::store::{session_not_found, SessionStore};
use crate::error::Result;
use crate::models::{ChatMessage, CodeSession, MessageKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codejam_protocol::{ChatMessageData, SessionData};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_session(&self, id: Uuid) -> Result<Option<CodeSession>> {
        let session = sqlx::query_as::<_, CodeSession>(
            r#"
            SELECT id, name, language, code, created_at, updated_at
            FROM code_sessions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(session)
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
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
        sqlx::query(
            r#"
            INSERT INTO code_sessions (id, name, language, code, created_at, updated_at)
            VALUES ($1, $2, $3, '', NOW(), NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(language)
        .execute(&self.db)
        .await?;

        self.get_session(id).await
    }

    async fn get_session(&self, id: Uuid) -> Result<SessionData> {
        let session = self
            .fetch_session(id)
            .await?
            .ok_or_else(|| session_not_found(id))?;

        let messages = self.list_messages(id).await?;
        Ok(session.into_data(messages))
    }

    async fn append_chat_message(
        &self,
        session_id: Uuid,
        message: &ChatMessageData,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, session_id, user_id, display_name, kind, text, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.id)
        .bind(session_id)
        .bind(message.user_id)
        .bind(&message.display_name)
        .bind(MessageKind::from(message.kind))
        .bind(&message.text)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE code_sessions SET updated_at = NOW() WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_code_snapshot(&self, session_id: Uuid, code: &str) -> Result<DateTime<Utc>> {
        let saved_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE code_sessions SET code = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING updated_at
            "#,
        )
        .bind(session_id)
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        saved_at.ok_or_else(|| session_not_found(session_id))
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessageData>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, session_id, user_id, display_name, kind, text, created_at
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.db)
        .await?;

        Ok(messages.into_iter().map(ChatMessageData::from).collect())
    }
}
