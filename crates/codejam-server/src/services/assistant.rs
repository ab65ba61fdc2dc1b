use crate::error::{AppError, Result};
use crate::models::AssistAction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// External AI advisor. Only the assist API calls this; the relay never does.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn respond(
        &self,
        session_id: Uuid,
        prompt: &str,
        selected_code: Option<&str>,
        action: AssistAction,
    ) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct AssistApiRequest<'a> {
    session_id: Uuid,
    prompt: &'a str,
    selected_code: Option<&'a str>,
    action: AssistAction,
}

#[derive(Debug, Deserialize)]
struct AssistApiResponse {
    text: String,
}

pub struct HttpAssistant {
    client: reqwest::Client,
    url: String,
}

impl HttpAssistant {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Codejam/1.0")
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn respond(
        &self,
        session_id: Uuid,
        prompt: &str,
        selected_code: Option<&str>,
        action: AssistAction,
    ) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&AssistApiRequest {
                session_id,
                prompt,
                selected_code,
                action,
            })
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("AI service request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "AI service returned {}",
                response.status()
            )));
        }

        let body: AssistApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Invalid AI service response: {}", e)))?;

        Ok(body.text)
    }
}
