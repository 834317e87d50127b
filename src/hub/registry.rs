//! The connection registry: three independently-locked tables mapping
//! connections to players and players to rooms, plus the broadcast helpers
//! built on top of them.
//!
//! Kept separate from `SessionManager`'s tables deliberately — a session can
//! outlive the sockets attached to it (grace-period disconnects), and a
//! connection can exist before it has joined anything (still queued, or
//! mid-handshake).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::hub::protocol::ServerMessage;
use crate::session::SessionId;

/// Consecutive drops an outbound queue tolerates before the connection is
/// considered unrecoverably behind and force-closed.
const LAG_FORCE_CLOSE_THRESHOLD: u32 = 20;

/// Opaque per-socket identifier, distinct from `SessionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded outbound mailbox for one connection. Unlike a plain `mpsc`
/// channel, a full queue does not reject the newest message: it evicts the
/// oldest droppable (non-terminal) message to make room, since a later
/// state snapshot already supersedes an older one. Terminal messages
/// (`game_ended`, `error`) are never evicted and are always enqueued even
/// past capacity. Persistent eviction is tracked by a lag counter; once it
/// crosses [`LAG_FORCE_CLOSE_THRESHOLD`] the connection is marked
/// force-closed and the writer/reader pump tears it down.
pub(crate) struct OutboundQueue {
    messages: Mutex<VecDeque<ServerMessage>>,
    capacity: usize,
    readable: Notify,
    lag: AtomicU32,
    force_closed: std::sync::atomic::AtomicBool,
    force_close_notify: Notify,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            readable: Notify::new(),
            lag: AtomicU32::new(0),
            force_closed: std::sync::atomic::AtomicBool::new(false),
            force_close_notify: Notify::new(),
        }
    }

    /// Enqueues `message`, evicting the oldest droppable message if the
    /// queue is already at capacity. Returns `false` once this push has
    /// driven the lag counter past the force-close threshold; the caller
    /// should treat the connection as dead from that point on.
    pub(crate) async fn push(&self, message: ServerMessage) -> bool {
        if self.force_closed.load(Ordering::SeqCst) {
            return false;
        }

        let mut messages = self.messages.lock().await;
        if messages.len() >= self.capacity {
            match messages.iter().position(|m| !m.is_terminal()) {
                Some(idx) => {
                    messages.remove(idx);
                    messages.push_back(message);
                    drop(messages);
                    self.readable.notify_one();
                    return self.record_drop();
                }
                None if message.is_terminal() => {
                    // Saturated with undroppable terminal messages: queue
                    // grows past capacity rather than dropping either one.
                    messages.push_back(message);
                    drop(messages);
                    self.readable.notify_one();
                    return self.lag.load(Ordering::SeqCst) < LAG_FORCE_CLOSE_THRESHOLD;
                }
                None => {
                    // Nothing droppable and the incoming message is itself
                    // droppable: it is the one dropped.
                    drop(messages);
                    return self.record_drop();
                }
            }
        }

        messages.push_back(message);
        drop(messages);
        self.lag.store(0, Ordering::SeqCst);
        self.readable.notify_one();
        true
    }

    fn record_drop(&self) -> bool {
        let lag = self.lag.fetch_add(1, Ordering::SeqCst) + 1;
        if lag >= LAG_FORCE_CLOSE_THRESHOLD && !self.force_closed.swap(true, Ordering::SeqCst) {
            warn!(lag, "connection outbound queue lagging past threshold, force-closing");
            self.force_close_notify.notify_waiters();
            return false;
        }
        lag < LAG_FORCE_CLOSE_THRESHOLD
    }

    /// Waits for and removes the next message. Returns `None` once the
    /// connection has been force-closed and the queue is drained.
    pub(crate) async fn pop(&self) -> Option<ServerMessage> {
        loop {
            {
                let mut messages = self.messages.lock().await;
                if let Some(message) = messages.pop_front() {
                    return Some(message);
                }
            }
            if self.force_closed.load(Ordering::SeqCst) {
                return None;
            }
            self.readable.notified().await;
        }
    }

    /// Resolves once the connection has been force-closed due to sustained
    /// lag, or immediately if it already has been.
    pub(crate) async fn closed(&self) {
        loop {
            if self.force_closed.load(Ordering::SeqCst) {
                return;
            }
            self.force_close_notify.notified().await;
        }
    }
}

/// A registered connection's handle: its outbound queue plus the mutable
/// bookkeeping the registry needs to clean it up later.
struct ConnectionHandle {
    username: String,
    outbound: Arc<OutboundQueue>,
    room: Mutex<Option<SessionId>>,
}

/// The hub's connection bookkeeping, independent of game rules.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    player_connections: RwLock<HashMap<String, ConnectionId>>,
    rooms: RwLock<HashMap<SessionId, HashSet<ConnectionId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly-accepted connection for `username`, with an
    /// outbound mailbox bounded to `capacity`. If the player already has a
    /// live connection, it is superseded: it is removed from the registry
    /// and whatever room it was in (its own pump tears down once its reader
    /// loop next notices the socket is gone).
    ///
    /// Returns the new connection's id and the queue its writer pump should
    /// drain from.
    pub async fn register(&self, username: String, capacity: usize) -> (ConnectionId, Arc<OutboundQueue>) {
        let id = ConnectionId::new();
        let outbound = Arc::new(OutboundQueue::new(capacity));
        let handle = Arc::new(ConnectionHandle { username: username.clone(), outbound: outbound.clone(), room: Mutex::new(None) });

        let previous = {
            let mut players = self.player_connections.write().await;
            players.insert(username.clone(), id)
        };

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, handle);
        }

        if let Some(previous_id) = previous {
            debug!(%username, old = %previous_id, new = %id, "superseding prior connection");
            self.disconnect(previous_id).await;
        }

        (id, outbound)
    }

    /// Removes a connection from all three tables. Idempotent.
    pub async fn disconnect(&self, id: ConnectionId) {
        let handle = { self.connections.write().await.remove(&id) };
        let Some(handle) = handle else { return };

        {
            let mut players = self.player_connections.write().await;
            if players.get(&handle.username) == Some(&id) {
                players.remove(&handle.username);
            }
        }

        let room = *handle.room.lock().await;
        if let Some(session_id) = room {
            self.remove_from_room(session_id, id).await;
        }
    }

    /// Adds `id` to `session_id`'s room membership set.
    pub async fn join_room(&self, id: ConnectionId, session_id: SessionId) {
        if let Some(handle) = self.connections.read().await.get(&id).cloned() {
            *handle.room.lock().await = Some(session_id);
        }
        self.rooms.write().await.entry(session_id).or_default().insert(id);
    }

    async fn remove_from_room(&self, session_id: SessionId, id: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&session_id) {
            members.remove(&id);
            if members.is_empty() {
                rooms.remove(&session_id);
            }
        }
    }

    pub async fn connection_for_player(&self, username: &str) -> Option<ConnectionId> {
        self.player_connections.read().await.get(username).copied()
    }

    /// Enqueues `message` for one connection. Returns `false` if the
    /// connection is gone or has just been force-closed for sustained lag.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let handle = self.connections.read().await.get(&id).cloned();
        match handle {
            Some(handle) => handle.outbound.push(message).await,
            None => false,
        }
    }

    pub async fn send_to_player(&self, username: &str, message: ServerMessage) -> bool {
        match self.connection_for_player(username).await {
            Some(id) => self.send_to(id, message).await,
            None => false,
        }
    }

    /// Enqueues `message` for every connection in `session_id`'s room,
    /// optionally skipping one (the sender, when it already applied the
    /// change optimistically).
    pub async fn broadcast_room(&self, session_id: SessionId, message: ServerMessage, exclude: Option<ConnectionId>) {
        let members: Vec<ConnectionId> = {
            let rooms = self.rooms.read().await;
            match rooms.get(&session_id) {
                Some(set) => set.iter().copied().filter(|id| Some(*id) != exclude).collect(),
                None => return,
            }
        };
        for id in members {
            self.send_to(id, message.clone()).await;
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pong() -> ServerMessage {
        ServerMessage::Pong { payload: crate::hub::protocol::Empty {}, timestamp: Utc::now() }
    }

    fn game_ended(game_id: SessionId) -> ServerMessage {
        ServerMessage::GameEnded {
            payload: crate::hub::protocol::GameEndedPayload { game_id, winner: None, reason: crate::session::EndReason::Forfeit },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn new_connection_supersedes_prior_one() {
        let registry = ConnectionRegistry::new();
        let (first, _first_queue) = registry.register("alice".into(), 4).await;
        let (second, _second_queue) = registry.register("alice".into(), 4).await;

        assert_ne!(first, second);
        assert_eq!(registry.connection_for_player("alice").await, Some(second));
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_room_reaches_all_members_except_excluded() {
        let registry = ConnectionRegistry::new();
        let session_id = SessionId::new();

        let (a, queue_a) = registry.register("alice".into(), 4).await;
        let (b, queue_b) = registry.register("bob".into(), 4).await;
        registry.join_room(a, session_id).await;
        registry.join_room(b, session_id).await;

        registry.broadcast_room(session_id, pong(), Some(a)).await;

        // alice was excluded: her queue stays empty.
        assert!(tokio::time::timeout(std::time::Duration::from_millis(10), queue_a.pop()).await.is_err());
        assert!(queue_b.pop().await.is_some());
    }

    #[tokio::test]
    async fn disconnect_removes_from_room() {
        let registry = ConnectionRegistry::new();
        let session_id = SessionId::new();
        let (id, _queue) = registry.register("alice".into(), 4).await;
        registry.join_room(id, session_id).await;

        registry.disconnect(id).await;

        registry.broadcast_room(session_id, pong(), None).await;
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_state_message_not_the_new_one() {
        let queue = OutboundQueue::new(1);
        assert!(queue.push(pong()).await);
        assert!(queue.push(pong()).await);

        assert_eq!(queue.messages.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn terminal_messages_are_never_evicted() {
        let session_id = SessionId::new();
        let queue = OutboundQueue::new(1);
        assert!(queue.push(game_ended(session_id)).await);
        // Queue is full of an undroppable terminal message: the incoming
        // state message is the one dropped, not the terminal one.
        assert!(queue.push(pong()).await);

        let remaining = queue.messages.lock().await;
        assert_eq!(remaining.len(), 1);
        assert!(matches!(remaining.front(), Some(ServerMessage::GameEnded { .. })));
    }

    #[tokio::test]
    async fn sustained_lag_force_closes_the_connection() {
        let queue = OutboundQueue::new(1);
        assert!(queue.push(pong()).await);

        let mut force_closed = false;
        for _ in 0..LAG_FORCE_CLOSE_THRESHOLD {
            if !queue.push(pong()).await {
                force_closed = true;
                break;
            }
        }

        assert!(force_closed);
        queue.closed().await;
    }
}
