use super::room::Room;
use codejam_protocol::{ParticipantData, ServerMessage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

struct Connection {
    participant: ParticipantData,
    sender: mpsc::UnboundedSender<String>,
    sessions: HashSet<Uuid>,
}

/// Held by a socket's writer task until it has flushed and closed.
/// [`SessionRegistry::sockets_closed`] waits for all of them.
pub struct SocketGuard {
    _live: mpsc::Sender<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Newly joined; holds the members that were present before
    Joined(Vec<ParticipantData>),
    /// Connection was already in the session; holds the other members
    AlreadyJoined(Vec<ParticipantData>),
    UnknownConnection,
    Draining,
}

/// In-memory mirror of which live connections are in which session.
///
/// Lifecycle: created with [`SessionRegistry::new`], stops accepting
/// connections after [`SessionRegistry::drain`], and drops every outbound
/// queue on [`SessionRegistry::shutdown`].
///
/// Lock order: a room lock may be held while taking the `rooms` map lock or
/// the `connections` lock, never the other way round.
pub struct SessionRegistry {
    /// Map from connection ID to its outbound queue and memberships
    connections: RwLock<HashMap<Uuid, Connection>>,
    /// Map from session ID to its room
    rooms: RwLock<HashMap<Uuid, Arc<Room>>>,
    accepting: AtomicBool,
    /// Cloned into every [`SocketGuard`]; taken on shutdown
    live: RwLock<Option<mpsc::Sender<()>>>,
    /// Yields `None` once every guard is dropped
    idle: Mutex<mpsc::Receiver<()>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (live, idle) = mpsc::channel(1);
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            live: RwLock::new(Some(live)),
            idle: Mutex::new(idle),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Register a live connection. Returns `None` while draining; otherwise
    /// the guard the socket's writer task holds until it is done.
    pub async fn add_connection(
        &self,
        participant: ParticipantData,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<SocketGuard> {
        if !self.is_accepting() {
            return None;
        }
        let guard = SocketGuard {
            _live: self.live.read().await.clone()?,
        };

        tracing::debug!(
            "User {} connected with connection ID {}",
            participant.user_id,
            participant.connection_id
        );

        self.connections.write().await.insert(
            participant.connection_id,
            Connection {
                participant,
                sender,
                sessions: HashSet::new(),
            },
        );
        Some(guard)
    }

    /// Leave every session and drop the outbound queue. Safe to call twice.
    pub async fn remove_connection(&self, connection_id: Uuid) -> Vec<Uuid> {
        let left = self.leave(connection_id).await;

        if let Some(conn) = self.connections.write().await.remove(&connection_id) {
            tracing::debug!(
                "User {} disconnected (connection ID {})",
                conn.participant.user_id,
                connection_id
            );
        }

        left
    }

    pub async fn participant(&self, connection_id: Uuid) -> Option<ParticipantData> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|c| c.participant.clone())
    }

    /// Add a connection to a session, creating the room if needed, and
    /// notify the members already present.
    pub async fn join(&self, session_id: Uuid, connection_id: Uuid) -> JoinOutcome {
        self.join_with(session_id, connection_id, |_| None).await
    }

    /// Like [`join`](Self::join), but first queues `welcome(others)` to the
    /// joiner while the room is still locked, so nothing relayed in the
    /// session can overtake it.
    pub async fn join_with<F>(&self, session_id: Uuid, connection_id: Uuid, welcome: F) -> JoinOutcome
    where
        F: FnOnce(&[ParticipantData]) -> Option<ServerMessage>,
    {
        if !self.is_accepting() {
            return JoinOutcome::Draining;
        }

        let Some(participant) = self.participant(connection_id).await else {
            return JoinOutcome::UnknownConnection;
        };

        loop {
            let room = self.room_or_create(session_id).await;
            let mut state = room.lock().await;

            // Emptied and unlinked between lookup and lock; fetch a fresh one
            if state.is_closed() {
                continue;
            }

            if state.contains(connection_id) {
                let others: Vec<_> = state
                    .members()
                    .into_iter()
                    .filter(|p| p.connection_id != connection_id)
                    .collect();
                if let Some(json) = welcome(&others).as_ref().and_then(encode) {
                    deliver(&*self.connections.read().await, connection_id, &json);
                }
                return JoinOutcome::AlreadyJoined(others);
            }

            let existing = state.members();
            state.insert(participant.clone());

            let mut connections = self.connections.write().await;
            let registered = match connections.get_mut(&connection_id) {
                Some(conn) => {
                    conn.sessions.insert(session_id);
                    true
                }
                None => false,
            };
            if !registered {
                // Disconnected while we were waiting for the room lock
                state.remove(connection_id);
                drop(connections);
                self.close_if_empty(&room, &mut state).await;
                return JoinOutcome::UnknownConnection;
            }

            if let Some(json) = welcome(&existing).as_ref().and_then(encode) {
                deliver(&connections, connection_id, &json);
            }

            let notice = ServerMessage::UserJoined {
                user_id: participant.user_id,
                display_name: participant.display_name.clone(),
                connection_id,
            };
            if let Some(json) = encode(&notice) {
                for member in &existing {
                    deliver(&connections, member.connection_id, &json);
                }
            }

            tracing::info!(
                "Connection {} joined session {} ({} members)",
                connection_id,
                session_id,
                state.len()
            );
            return JoinOutcome::Joined(existing);
        }
    }

    /// Remove a connection from one session. Returns false if it was not a
    /// member, in which case nobody is notified.
    pub async fn leave_session(&self, session_id: Uuid, connection_id: Uuid) -> bool {
        let Some(room) = self.rooms.read().await.get(&session_id).cloned() else {
            return false;
        };

        let mut state = room.lock().await;
        if state.remove(connection_id).is_none() {
            return false;
        }

        let connections = {
            let mut connections = self.connections.write().await;
            if let Some(conn) = connections.get_mut(&connection_id) {
                conn.sessions.remove(&session_id);
            }
            connections.downgrade()
        };

        if let Some(json) = encode(&ServerMessage::UserLeft { connection_id }) {
            for member in state.recipients(None) {
                deliver(&connections, member, &json);
            }
        }
        drop(connections);

        tracing::info!("Connection {} left session {}", connection_id, session_id);
        self.close_if_empty(&room, &mut state).await;
        true
    }

    /// Remove a connection from every session it belongs to
    pub async fn leave(&self, connection_id: Uuid) -> Vec<Uuid> {
        let sessions: Vec<Uuid> = self
            .connections
            .read()
            .await
            .get(&connection_id)
            .map(|c| c.sessions.iter().copied().collect())
            .unwrap_or_default();

        let mut left = Vec::with_capacity(sessions.len());
        for session_id in sessions {
            if self.leave_session(session_id, connection_id).await {
                left.push(session_id);
            }
        }
        left
    }

    pub async fn members(&self, session_id: Uuid) -> Vec<ParticipantData> {
        let Some(room) = self.rooms.read().await.get(&session_id).cloned() else {
            return vec![];
        };
        let state = room.lock().await;
        state.members()
    }

    pub async fn is_member(&self, session_id: Uuid, connection_id: Uuid) -> bool {
        let Some(room) = self.rooms.read().await.get(&session_id).cloned() else {
            return false;
        };
        let state = room.lock().await;
        state.contains(connection_id)
    }

    /// Deliver to every member of a session except `exclude`. Returns the
    /// number of queues the message was handed to.
    pub async fn broadcast(
        &self,
        session_id: Uuid,
        message: &ServerMessage,
        exclude: Option<Uuid>,
    ) -> usize {
        let Some(json) = encode(message) else {
            return 0;
        };

        let Some(room) = self.rooms.read().await.get(&session_id).cloned() else {
            tracing::debug!("No room for session {}", session_id);
            return 0;
        };

        let recipients = room.lock().await.recipients(exclude);
        let connections = self.connections.read().await;

        tracing::debug!(
            "Broadcasting to {} members of session {}",
            recipients.len(),
            session_id
        );
        recipients
            .into_iter()
            .filter(|id| deliver(&connections, *id, &json))
            .count()
    }

    /// Deliver to one connection regardless of session. Unknown or departed
    /// targets are dropped silently.
    pub async fn send_to(&self, connection_id: Uuid, message: &ServerMessage) -> bool {
        let Some(json) = encode(message) else {
            return false;
        };
        let connections = self.connections.read().await;
        deliver(&connections, connection_id, &json)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Stop accepting connections and joins, and tell every client
    pub async fn drain(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }

        let connections = self.connections.read().await;
        tracing::info!("Draining {} connections", connections.len());
        if let Some(json) = encode(&ServerMessage::ServerShutdown) {
            for id in connections.keys() {
                deliver(&connections, *id, &json);
            }
        }
    }

    /// Drop every outbound queue and room. Writer tasks end once their
    /// queue is closed.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.live.write().await.take();

        let rooms: Vec<Arc<Room>> = self.rooms.write().await.drain().map(|(_, r)| r).collect();
        for room in rooms {
            room.lock().await.close();
        }

        let dropped = self.connections.write().await.drain().count();
        tracing::info!("Session registry shut down ({} connections dropped)", dropped);
    }

    /// Resolves once every socket writer has finished. Only meaningful after
    /// [`shutdown`](Self::shutdown).
    pub async fn sockets_closed(&self) {
        let _ = self.idle.lock().await.recv().await;
    }

    async fn room_or_create(&self, session_id: Uuid) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(&session_id) {
            return room.clone();
        }

        self.rooms
            .write()
            .await
            .entry(session_id)
            .or_insert_with(|| {
                tracing::debug!("Creating room for session {}", session_id);
                Arc::new(Room::new(session_id))
            })
            .clone()
    }

    async fn close_if_empty(&self, room: &Arc<Room>, state: &mut super::room::RoomState) {
        if !state.is_empty() {
            return;
        }

        state.close();
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(&room.session_id())
            .is_some_and(|current| Arc::ptr_eq(current, room))
        {
            rooms.remove(&room.session_id());
            tracing::debug!("Removed empty room for session {}", room.session_id());
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            None
        }
    }
}

fn deliver(connections: &HashMap<Uuid, Connection>, connection_id: Uuid, json: &str) -> bool {
    let Some(conn) = connections.get(&connection_id) else {
        tracing::debug!("Dropping message for departed connection {}", connection_id);
        return false;
    };

    if let Err(e) = conn.sender.send(json.to_string()) {
        tracing::debug!("Failed to send message to {}: {}", connection_id, e);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use codejam_protocol::{CodeChange, CodeChangeEvent};

    struct TestConn {
        id: Uuid,
        rx: mpsc::UnboundedReceiver<String>,
        guard: Option<SocketGuard>,
    }

    impl TestConn {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = vec![];
            while let Ok(json) = self.rx.try_recv() {
                out.push(serde_json::from_str(&json).unwrap());
            }
            out
        }
    }

    async fn connect(registry: &SessionRegistry, name: &str) -> TestConn {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let guard = registry
            .add_connection(
                ParticipantData {
                    connection_id: id,
                    user_id: Uuid::new_v4(),
                    display_name: name.to_string(),
                },
                tx,
            )
            .await;
        TestConn { id, rx, guard }
    }

    fn replace(session_id: Uuid, sender_id: Uuid, content: &str) -> ServerMessage {
        ServerMessage::CodeChange {
            event: CodeChangeEvent {
                session_id,
                sender_id,
                user_id: Uuid::nil(),
                change: CodeChange::Replace {
                    content: content.to_string(),
                },
                revision: None,
                timestamp: chrono::Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn join_adds_member_and_notifies_existing() {
        let registry = SessionRegistry::new();
        let session = Uuid::new_v4();
        let mut a = connect(&registry, "a").await;
        let mut b = connect(&registry, "b").await;

        assert_eq!(registry.join(session, a.id).await, JoinOutcome::Joined(vec![]));
        match registry.join(session, b.id).await {
            JoinOutcome::Joined(existing) => {
                assert_eq!(existing.len(), 1);
                assert_eq!(existing[0].connection_id, a.id);
            }
            other => panic!("unexpected {:?}", other),
        }

        let members = registry.members(session).await;
        assert!(members.iter().any(|p| p.connection_id == b.id));

        assert!(matches!(
            a.drain().as_slice(),
            [ServerMessage::UserJoined { connection_id, .. }] if *connection_id == b.id
        ));
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn rejoin_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = Uuid::new_v4();
        let mut a = connect(&registry, "a").await;
        let b = connect(&registry, "b").await;

        registry.join(session, a.id).await;
        registry.join(session, b.id).await;
        a.drain();

        assert!(matches!(
            registry.join(session, b.id).await,
            JoinOutcome::AlreadyJoined(_)
        ));
        assert!(a.drain().is_empty());
        assert_eq!(registry.members(session).await.len(), 2);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let registry = SessionRegistry::new();
        let session = Uuid::new_v4();
        let mut a = connect(&registry, "a").await;
        let mut b = connect(&registry, "b").await;
        registry.join(session, a.id).await;
        registry.join(session, b.id).await;
        a.drain();

        let delivered = registry
            .broadcast(session, &replace(session, a.id, "let x=1"), Some(a.id))
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(b.drain().len(), 1);
        assert!(a.drain().is_empty());
    }

    #[tokio::test]
    async fn double_leave_notifies_once() {
        let registry = SessionRegistry::new();
        let session = Uuid::new_v4();
        let mut a = connect(&registry, "a").await;
        let b = connect(&registry, "b").await;
        registry.join(session, a.id).await;
        registry.join(session, b.id).await;
        a.drain();

        assert_eq!(registry.leave(b.id).await, vec![session]);
        assert!(registry.leave(b.id).await.is_empty());
        registry.remove_connection(b.id).await;
        registry.remove_connection(b.id).await;

        let notices = a.drain();
        assert_eq!(
            notices,
            vec![ServerMessage::UserLeft {
                connection_id: b.id
            }]
        );
        let members = registry.members(session).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].connection_id, a.id);
    }

    #[tokio::test]
    async fn departed_member_gets_no_broadcasts() {
        let registry = SessionRegistry::new();
        let session = Uuid::new_v4();
        let a = connect(&registry, "a").await;
        let mut b = connect(&registry, "b").await;
        registry.join(session, a.id).await;
        registry.join(session, b.id).await;

        registry.leave_session(session, b.id).await;
        registry
            .broadcast(session, &replace(session, a.id, "x"), Some(a.id))
            .await;

        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn empty_rooms_are_removed() {
        let registry = SessionRegistry::new();
        let session = Uuid::new_v4();
        let a = connect(&registry, "a").await;

        registry.join(session, a.id).await;
        assert_eq!(registry.session_count().await, 1);

        registry.remove_connection(a.id).await;
        assert_eq!(registry.session_count().await, 0);
        assert!(registry.members(session).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_targets_are_dropped() {
        let registry = SessionRegistry::new();

        assert!(!registry.send_to(Uuid::new_v4(), &ServerMessage::Pong).await);
        assert_eq!(
            registry
                .broadcast(Uuid::new_v4(), &ServerMessage::Pong, None)
                .await,
            0
        );
        assert!(!registry.leave_session(Uuid::new_v4(), Uuid::new_v4()).await);
        assert_eq!(
            registry.join(Uuid::new_v4(), Uuid::new_v4()).await,
            JoinOutcome::UnknownConnection
        );
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_does_not_fail() {
        let registry = SessionRegistry::new();
        let conn = connect(&registry, "a").await;
        let id = conn.id;
        drop(conn);

        assert!(!registry.send_to(id, &ServerMessage::Pong).await);
    }

    #[tokio::test]
    async fn concurrent_joins_are_not_lost() {
        let registry = Arc::new(SessionRegistry::new());
        let session = Uuid::new_v4();
        let mut conns = vec![];
        for i in 0..32 {
            conns.push(connect(&registry, &format!("user{}", i)).await);
        }

        let handles: Vec<_> = conns
            .iter()
            .map(|c| {
                let registry = registry.clone();
                let id = c.id;
                tokio::spawn(async move { registry.join(session, id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.members(session).await.len(), 32);
    }

    #[tokio::test]
    async fn drain_rejects_new_work_and_notifies() {
        let registry = SessionRegistry::new();
        let mut a = connect(&registry, "a").await;

        registry.drain().await;

        assert_eq!(a.drain(), vec![ServerMessage::ServerShutdown]);
        assert_eq!(
            registry.join(Uuid::new_v4(), a.id).await,
            JoinOutcome::Draining
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(
            registry
                .add_connection(
                    ParticipantData {
                        connection_id: Uuid::new_v4(),
                        user_id: Uuid::new_v4(),
                        display_name: "late".to_string(),
                    },
                    tx,
                )
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn shutdown_closes_outbound_queues() {
        let registry = SessionRegistry::new();
        let mut a = connect(&registry, "a").await;
        registry.join(Uuid::new_v4(), a.id).await;

        registry.shutdown().await;

        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.session_count().await, 0);
        assert!(a.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn sockets_closed_waits_for_every_writer() {
        let registry = SessionRegistry::new();
        let mut a = connect(&registry, "a").await;
        let mut b = connect(&registry, "b").await;
        assert!(a.guard.is_some());

        registry.shutdown().await;

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            registry.sockets_closed(),
        )
        .await;
        assert!(pending.is_err());

        a.guard.take();
        b.guard.take();
        tokio::time::timeout(std::time::Duration::from_secs(1), registry.sockets_closed())
            .await
            .expect("all writers finished");
    }
}
