use sketch_types::{ParticipantId, ServerMessage, SessionId};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tokio::task::AbortHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session seat a socket is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub session_id: SessionId,
    pub user_id: ParticipantId,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub membership: Option<Membership>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    /// Task relaying the session's change feed to this socket.
    forwarder: Option<AbortHandle>,
}

impl Connection {
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let now = Instant::now();

        let connection = Self {
            id,
            membership: None,
            connected_at: now,
            last_activity: now,
            sender,
            forwarder: None,
        };

        (connection, receiver)
    }

    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn send_message(&self, message: ServerMessage) -> Result<(), String> {
        self.sender
            .send(message)
            .map_err(|_| "Connection closed".to_string())
    }

    pub fn is_inactive(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Drops the seat and stops relaying feed items.
    fn detach(&mut self) -> Option<Membership> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.membership.take()
    }
}

pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_connection(
        &self,
        id: ConnectionId,
    ) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (conn, receiver) = Connection::new(id);

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, conn);
        }

        receiver
    }

    /// Forgets the connection. Returns the seat it held, if any.
    pub async fn remove_connection(&self, id: ConnectionId) -> Option<Membership> {
        let mut connections = self.connections.write().await;
        connections.remove(&id).and_then(|mut conn| conn.detach())
    }

    pub async fn get_connection(&self, id: ConnectionId) -> Option<Connection> {
        let connections = self.connections.read().await;
        connections.get(&id).cloned()
    }

    pub async fn membership(&self, id: ConnectionId) -> Option<Membership> {
        let connections = self.connections.read().await;
        connections.get(&id).and_then(|conn| conn.membership)
    }

    /// Seats the connection in a session. A previous seat (and its feed
    /// relay) is replaced and returned.
    pub async fn attach(
        &self,
        id: ConnectionId,
        membership: Membership,
        forwarder: AbortHandle,
    ) -> Result<Option<Membership>, String> {
        let mut connections = self.connections.write().await;
        let Some(connection) = connections.get_mut(&id) else {
            forwarder.abort();
            return Err("Connection not found".to_string());
        };

        let previous = connection.detach();
        connection.membership = Some(membership);
        connection.forwarder = Some(forwarder);
        Ok(previous)
    }

    pub async fn detach(&self, id: ConnectionId) -> Option<Membership> {
        let mut connections = self.connections.write().await;
        connections.get_mut(&id).and_then(|conn| conn.detach())
    }

    pub async fn update_activity(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(&id) {
            connection.update_activity();
        }
    }

    pub async fn send_to_connection(
        &self,
        id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), String> {
        let connections = self.connections.read().await;
        if let Some(connection) = connections.get(&id) {
            connection.send_message(message)
        } else {
            Err("Connection not found".to_string())
        }
    }

    /// Removes idle sockets and hands back the seats they held so the
    /// caller can mark those participants offline.
    pub async fn cleanup_inactive_connections(&self, timeout: Duration) -> Vec<Membership> {
        let mut connections = self.connections.write().await;
        let inactive: Vec<ConnectionId> = connections
            .values()
            .filter(|conn| conn.is_inactive(timeout))
            .map(|conn| conn.id)
            .collect();

        let mut seats = Vec::new();
        for connection_id in inactive {
            tracing::info!("Removing inactive connection: {}", connection_id);
            if let Some(seat) = connections
                .remove(&connection_id)
                .and_then(|mut conn| conn.detach())
            {
                seats.push(seat);
            }
        }
        seats
    }

    pub async fn connections_in_session(&self, session_id: SessionId) -> Vec<ConnectionId> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|conn| conn.membership.is_some_and(|m| m.session_id == session_id))
            .map(|conn| conn.id)
            .collect()
    }

    pub async fn has_seat(&self, seat: Membership) -> bool {
        let connections = self.connections.read().await;
        connections.values().any(|conn| conn.membership == Some(seat))
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}
