use codejam_protocol::ParticipantData;
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Broadcast domain of one session.
///
/// All membership changes for a session go through this room's mutex, so
/// joins and leaves on one session are serialized while different sessions
/// proceed in parallel.
pub struct Room {
    session_id: Uuid,
    state: Mutex<RoomState>,
}

#[derive(Default)]
pub struct RoomState {
    members: HashMap<Uuid, ParticipantData>,
    /// Set once the room was emptied and unlinked from the registry
    closed: bool,
}

impl Room {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            state: Mutex::new(RoomState::default()),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }
}

impl RoomState {
    pub fn contains(&self, connection_id: Uuid) -> bool {
        self.members.contains_key(&connection_id)
    }

    /// Returns false if the participant was already a member
    pub fn insert(&mut self, participant: ParticipantData) -> bool {
        self.members
            .insert(participant.connection_id, participant)
            .is_none()
    }

    pub fn remove(&mut self, connection_id: Uuid) -> Option<ParticipantData> {
        self.members.remove(&connection_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Members ordered by connection id
    pub fn members(&self) -> Vec<ParticipantData> {
        let mut members: Vec<_> = self.members.values().cloned().collect();
        members.sort_by_key(|p| p.connection_id);
        members
    }

    pub fn recipients(&self, exclude: Option<Uuid>) -> Vec<Uuid> {
        self.members
            .keys()
            .copied()
            .filter(|id| Some(*id) != exclude)
            .collect()
    }
}
