//! Helpers for driving relays without sockets.

use crate::relay::lifecycle;
use crate::services::memory::InMemorySessionStore;
use crate::services::store::SessionStore;
use crate::state::{AppState, Config};
use crate::ws::registry::SocketGuard;
use codejam_protocol::{ParticipantData, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct TestClient {
    pub participant: ParticipantData,
    rx: mpsc::UnboundedReceiver<String>,
    _guard: Option<SocketGuard>,
}

impl TestClient {
    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = vec![];
        while let Ok(json) = self.rx.try_recv() {
            out.push(serde_json::from_str(&json).expect("valid server message"));
        }
        out
    }

    /// Wait for the next message
    pub async fn recv(&mut self) -> ServerMessage {
        let json = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("queue closed");
        serde_json::from_str(&json).expect("valid server message")
    }
}

pub fn test_state() -> AppState {
    state_with_store(Arc::new(InMemorySessionStore::new()))
}

pub fn state_with_store(store: Arc<dyn SessionStore>) -> AppState {
    AppState::new(Config::default(), store).expect("state")
}

pub async fn connect(state: &AppState, name: &str) -> TestClient {
    let (tx, rx) = mpsc::unbounded_channel();
    let participant = ParticipantData {
        connection_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        display_name: name.to_string(),
    };
    let guard = lifecycle::connect(state, participant.clone(), tx).await;
    TestClient {
        participant,
        rx,
        _guard: guard,
    }
}

/// Join and consume the `Joined` reply
pub async fn join(state: &AppState, session_id: Uuid, client: &mut TestClient) {
    lifecycle::join(state, &client.participant, session_id).await;
    match client.recv().await {
        ServerMessage::Joined { .. } => {}
        other => panic!("expected Joined, got {:?}", other),
    }
}
