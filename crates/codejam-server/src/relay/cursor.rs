use crate::state::AppState;
use codejam_protocol::{CursorEvent, ParticipantData, ServerMessage};
use uuid::Uuid;

/// Forward a cursor position to the other members. Cosmetic only: never
/// persisted and not ordered relative to code changes.
pub async fn on_cursor_move(
    state: &AppState,
    sender: &ParticipantData,
    session_id: Uuid,
    line: u32,
    column: u32,
) -> bool {
    if !state
        .registry
        .is_member(session_id, sender.connection_id)
        .await
    {
        tracing::debug!(
            "Dropping cursor move from {} for session {}",
            sender.connection_id,
            session_id
        );
        return false;
    }

    let event = CursorEvent {
        session_id,
        user_id: sender.user_id,
        connection_id: sender.connection_id,
        line,
        column,
    };

    state
        .registry
        .broadcast(
            session_id,
            &ServerMessage::CursorMove { event },
            Some(sender.connection_id),
        )
        .await;
    true
}
