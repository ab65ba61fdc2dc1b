use crate::state::AppState;
use crate::ws::registry::{JoinOutcome, SocketGuard};
use codejam_protocol::{ParticipantData, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Register a freshly authenticated connection. `None` while draining.
pub async fn connect(
    state: &AppState,
    participant: ParticipantData,
    sender: mpsc::UnboundedSender<String>,
) -> Option<SocketGuard> {
    state.registry.add_connection(participant, sender).await
}

/// Join a session, loading it from the store or creating it on first use.
///
/// The joiner gets `Joined` with the persisted snapshot and the current
/// members; it is never replayed relayed edits.
pub async fn join(
    state: &AppState,
    participant: &ParticipantData,
    session_id: Uuid,
) -> Option<JoinOutcome> {
    let session = match state.store.load_or_create(session_id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to load session {}: {}", session_id, e);
            state
                .registry
                .send_to(
                    participant.connection_id,
                    &ServerMessage::Error {
                        message: "Session could not be loaded".to_string(),
                    },
                )
                .await;
            return None;
        }
    };

    let outcome = state
        .registry
        .join_with(session_id, participant.connection_id, move |others| {
            Some(ServerMessage::Joined {
                session,
                members: others.to_vec(),
            })
        })
        .await;

    match &outcome {
        JoinOutcome::Joined(_) | JoinOutcome::AlreadyJoined(_) => {}
        JoinOutcome::Draining => {
            state
                .registry
                .send_to(
                    participant.connection_id,
                    &ServerMessage::Error {
                        message: "Server is shutting down".to_string(),
                    },
                )
                .await;
        }
        JoinOutcome::UnknownConnection => {
            tracing::debug!(
                "Connection {} went away before joining {}",
                participant.connection_id,
                session_id
            );
        }
    }

    Some(outcome)
}

pub async fn leave(state: &AppState, participant: &ParticipantData, session_id: Uuid) -> bool {
    state
        .registry
        .leave_session(session_id, participant.connection_id)
        .await
}

/// Connection lost or closed: leave every session and forget the connection.
/// Idempotent.
pub async fn disconnect(state: &AppState, connection_id: Uuid) -> Vec<Uuid> {
    state.registry.remove_connection(connection_id).await
}

/// Queue a save of the buffer as the session snapshot. The outcome is
/// reported to the acting connection only.
pub async fn save_snapshot(
    state: &AppState,
    participant: &ParticipantData,
    session_id: Uuid,
    code: String,
) -> bool {
    if !state
        .registry
        .is_member(session_id, participant.connection_id)
        .await
    {
        tracing::warn!(
            "Connection {} tried to save session {} without joining",
            participant.connection_id,
            session_id
        );
        state
            .registry
            .send_to(
                participant.connection_id,
                &ServerMessage::Error {
                    message: "Join the session before saving".to_string(),
                },
            )
            .await;
        return false;
    }

    state
        .persister
        .snapshot(session_id, code, participant.connection_id)
        .await;
    true
}
