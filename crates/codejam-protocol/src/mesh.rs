//! Client-side video mesh bookkeeping.
//!
//! Every participant pairs with every other participant in the session. The
//! relay is stateless with respect to call progress, so each endpoint tracks
//! its own links here, keyed by the remote connection id. Joiners offer to
//! the members listed in `Joined`; existing members wait for the offer.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::messages::ServerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    /// We sent an offer and wait for the answer
    OfferSent,
    /// Remote offered; we owe an answer
    OfferReceived,
    AnswerSent,
    AnswerReceived,
    Connected,
}

#[derive(Debug, Default)]
pub struct PeerMesh {
    peers: BTreeMap<Uuid, PeerState>,
}

impl PeerMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, remote: Uuid) -> Option<PeerState> {
        self.peers.get(&remote).copied()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Register a remote peer. Existing links are left untouched.
    pub fn add_peer(&mut self, remote: Uuid) {
        self.peers.entry(remote).or_insert(PeerState::Idle);
    }

    /// Peers we have not started negotiating with yet
    pub fn idle_peers(&self) -> Vec<Uuid> {
        self.peers
            .iter()
            .filter(|(_, state)| **state == PeerState::Idle)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn offer_sent(&mut self, remote: Uuid) -> Result<(), ProtocolError> {
        self.transition(remote, &[PeerState::Idle], PeerState::OfferSent)
    }

    /// An offer may arrive before we learned about the peer, so unknown
    /// peers are created on the fly.
    pub fn offer_received(&mut self, remote: Uuid) -> Result<(), ProtocolError> {
        self.add_peer(remote);
        self.transition(remote, &[PeerState::Idle], PeerState::OfferReceived)
    }

    pub fn answer_sent(&mut self, remote: Uuid) -> Result<(), ProtocolError> {
        self.transition(remote, &[PeerState::OfferReceived], PeerState::AnswerSent)
    }

    pub fn answer_received(&mut self, remote: Uuid) -> Result<(), ProtocolError> {
        self.transition(remote, &[PeerState::OfferSent], PeerState::AnswerReceived)
    }

    pub fn connected(&mut self, remote: Uuid) -> Result<(), ProtocolError> {
        self.transition(
            remote,
            &[PeerState::AnswerReceived, PeerState::AnswerSent],
            PeerState::Connected,
        )
    }

    pub fn remove(&mut self, remote: Uuid) -> Option<PeerState> {
        self.peers.remove(&remote)
    }

    /// Drop every link, returning the removed peers in ascending id order
    pub fn teardown(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.peers).into_keys().collect()
    }

    /// Update the mesh from a server event. Signaling messages that do not
    /// fit the current state are logged and ignored.
    pub fn apply(&mut self, message: &ServerMessage) {
        let result = match message {
            ServerMessage::Joined { members, .. } => {
                for member in members {
                    self.add_peer(member.connection_id);
                }
                Ok(())
            }
            ServerMessage::UserJoined { connection_id, .. } => {
                self.add_peer(*connection_id);
                Ok(())
            }
            ServerMessage::UserLeft { connection_id } => {
                self.remove(*connection_id);
                Ok(())
            }
            ServerMessage::WebrtcOffer { sender_id, .. } => self.offer_received(*sender_id),
            ServerMessage::WebrtcAnswer { sender_id, .. } => self.answer_received(*sender_id),
            ServerMessage::ServerShutdown => {
                self.teardown();
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!("Ignoring signaling message: {}", e);
        }
    }

    fn transition(
        &mut self,
        remote: Uuid,
        from: &[PeerState],
        to: PeerState,
    ) -> Result<(), ProtocolError> {
        let state = self.peers.get_mut(&remote).ok_or_else(|| {
            ProtocolError::InvalidTransition(format!("unknown peer {}", remote))
        })?;

        if !from.contains(state) {
            return Err(ProtocolError::InvalidTransition(format!(
                "{:?} -> {:?} for peer {}",
                state, to, remote
            )));
        }

        *state = to;
        Ok(())
    }
}
