//! Connection fabric: the in-process view of the bidirectional event
//! transport. Connections register an outbound queue; rooms group
//! connections for session fanout.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

pub type ConnectionId = String;

/// Outbound queue length per connection. Sends await capacity, so a slow
/// consumer backpressures replay instead of ballooning memory.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct ConnectionEntry<T> {
    sender: mpsc::Sender<T>,
}

/// Registry of live connections and their room membership.
///
/// Each connection owns one bounded mpsc queue; queue order is delivery
/// order, which gives FIFO per (sender, receiver) pair. Room membership
/// mutations serialize on the room map lock.
pub struct ConnectionFabric<T> {
    connections: DashMap<ConnectionId, ConnectionEntry<T>>,
    rooms: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    queue_capacity: usize,
}

impl<T: Send + Clone + 'static> ConnectionFabric<T> {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: RwLock::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Register a new connection; the caller drains the returned receiver
    /// into its transport socket.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<T>) {
        let id = uuid::Uuid::new_v4().to_string();
        let rx = self.register_with_id(id.clone());
        (id, rx)
    }

    /// Register under a caller-chosen id (used by tests).
    pub fn register_with_id(&self, id: ConnectionId) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.insert(id, ConnectionEntry { sender: tx });
        rx
    }

    /// Deliver directly to one connection. Returns false when the connection
    /// is gone; the failure never propagates to the caller's control flow.
    pub async fn emit(&self, connection_id: &str, message: T) -> bool {
        let sender = match self.connections.get(connection_id) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };
        if sender.send(message).await.is_err() {
            tracing::debug!(connection_id, "dropping emit to closed connection");
            self.disconnect(connection_id);
            return false;
        }
        true
    }

    /// Fan out to every room member, optionally excluding the sender. A
    /// failed emit to one peer is skipped; delivery to the rest continues.
    /// Returns the number of peers reached.
    pub async fn emit_room(
        &self,
        room_id: &str,
        message: T,
        exclude: Option<&str>,
    ) -> usize {
        let targets: Vec<ConnectionId> = {
            let rooms = self.rooms.read();
            match rooms.get(room_id) {
                Some(members) => members
                    .iter()
                    .filter(|id| exclude != Some(id.as_str()))
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for target in targets {
            if self.emit(&target, message.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn join_room(&self, connection_id: &str, room_id: &str) {
        self.rooms
            .write()
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    pub fn leave_room(&self, connection_id: &str, room_id: &str) {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(room_id) {
            members.remove(connection_id);
            if members.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    pub fn room_members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .read()
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_size(&self, room_id: &str) -> usize {
        self.rooms.read().get(room_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Tear down a connection: drop its queue and leave every room.
    pub fn disconnect(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        let mut rooms = self.rooms.write();
        rooms.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl<T: Send + Clone + 'static> Default for ConnectionFabric<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
