use crate::state::AppState;
use codejam_protocol::{ParticipantData, ServerMessage, SignalKind, SignalingEnvelope};
use uuid::Uuid;

/// Forward one signaling envelope to its target connection.
///
/// The payload is never parsed and no call state is kept here; the two
/// endpoints own their negotiation. A departed target means the envelope is
/// dropped and the caller has to time out.
pub async fn relay(
    state: &AppState,
    sender: &ParticipantData,
    kind: SignalKind,
    target_id: Uuid,
    payload: String,
) -> bool {
    if target_id == sender.connection_id {
        tracing::debug!("Dropping {:?} addressed to its own sender {}", kind, target_id);
        return false;
    }

    let envelope = SignalingEnvelope {
        kind,
        sender_id: sender.connection_id,
        target_id,
        payload,
    };

    let delivered = state
        .registry
        .send_to(target_id, &ServerMessage::from(envelope))
        .await;
    if !delivered {
        tracing::debug!(
            "Dropped {:?} from {} for unreachable target {}",
            kind,
            sender.connection_id,
            target_id
        );
    }
    delivered
}

pub async fn relay_offer(
    state: &AppState,
    sender: &ParticipantData,
    session_id: Uuid,
    target_id: Uuid,
    sdp: String,
) -> bool {
    tracing::debug!(
        "Relaying offer in session {} from {} to {}",
        session_id,
        sender.connection_id,
        target_id
    );
    relay(state, sender, SignalKind::Offer, target_id, sdp).await
}

pub async fn relay_answer(
    state: &AppState,
    sender: &ParticipantData,
    target_id: Uuid,
    sdp: String,
) -> bool {
    relay(state, sender, SignalKind::Answer, target_id, sdp).await
}

pub async fn relay_ice_candidate(
    state: &AppState,
    sender: &ParticipantData,
    target_id: Uuid,
    candidate: String,
) -> bool {
    relay(state, sender, SignalKind::IceCandidate, target_id, candidate).await
}
