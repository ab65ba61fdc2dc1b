use crate::state::AppState;
use chrono::Utc;
use codejam_protocol::{CodeChange, CodeChangeEvent, ParticipantData, ServerMessage};
use uuid::Uuid;

/// Forward a buffer edit to every other member of the session.
///
/// The relay does not diff, merge or order concurrent edits: whichever change
/// a receiver applies last wins locally. There is no replay buffer and the
/// persisted snapshot is only updated on an explicit save.
pub async fn on_code_change(
    state: &AppState,
    sender: &ParticipantData,
    session_id: Uuid,
    change: CodeChange,
    revision: Option<u64>,
) -> bool {
    if !state
        .registry
        .is_member(session_id, sender.connection_id)
        .await
    {
        tracing::warn!(
            "Dropping code change from {} for session {} it has not joined",
            sender.connection_id,
            session_id
        );
        return false;
    }

    let event = CodeChangeEvent {
        session_id,
        sender_id: sender.connection_id,
        user_id: sender.user_id,
        change,
        revision,
        timestamp: Utc::now(),
    };

    state
        .registry
        .broadcast(
            session_id,
            &ServerMessage::CodeChange { event },
            Some(sender.connection_id),
        )
        .await;
    true
}
