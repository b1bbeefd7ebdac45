//! Role-tagged registry of the sockets attached to one session.

use std::fmt;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::dto::ws::SessionOutboundMessage;

/// Channel feeding the writer task of one socket.
pub type OutboundSender = mpsc::UnboundedSender<Message>;

/// The socket's writer task is gone.
#[derive(Debug, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Identifier assigned to a socket when it is upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random identifier.
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
        fmt::Display::fmt(&self.0, f)
    }
}

/// What a socket may do in its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Drives the song selection.
    Master,
    /// Receives `sync` messages only.
    Follower,
}

/// A socket handle carrying its own role, fixed for the lifetime of the connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    role: Role,
    tx: OutboundSender,
}

impl Connection {
    /// Wrap the writer channel of socket `id`.
    pub fn new(id: ConnectionId, role: Role, tx: OutboundSender) -> Self {
        Self { id, role, tx }
    }

    /// Identifier of the socket.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Role fixed at attach time.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Shorthand for `role() == Role::Master`.
    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// Serialize a protocol message and queue it on the socket.
    ///
    /// Serialization failures are logged and swallowed; only a closed writer is
    /// reported to the caller.
    pub fn send(&self, message: &SessionOutboundMessage) -> Result<(), ConnectionClosed> {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize message `{message:?}` (permanent error, not retrying)");
                return Ok(());
            }
        };

        self.tx
            .send(Message::Text(payload.into()))
            .map_err(|_| ConnectionClosed)
    }

    /// Queue a close frame; the writer task flushes it and the peer disconnects.
    pub fn close(&self, code: u16, reason: &'static str) -> Result<(), ConnectionClosed> {
        self.tx
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: Utf8Bytes::from_static(reason),
            })))
            .map_err(|_| ConnectionClosed)
    }
}

/// Live connections of a session, in attach order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: IndexMap<ConnectionId, Connection>,
    master: Option<ConnectionId>,
}

impl ConnectionRegistry {
    /// Registry with no sockets and no master.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A master connection becomes the sole master
    /// reference; callers must [`take_master`](Self::take_master) first.
    pub fn attach(&mut self, connection: Connection) {
        if connection.is_master() {
            if let Some(previous) = self.master.replace(connection.id()) {
                // Never keep two masters registered.
                self.connections.shift_remove(&previous);
            }
        }
        self.connections.insert(connection.id(), connection);
    }

    /// Remove a connection, clearing the master reference if it was the master.
    pub fn detach(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.shift_remove(&id)?;
        if self.master == Some(id) {
            self.master = None;
        }
        Some(removed)
    }

    /// Detach and return the current master, if any.
    pub fn take_master(&mut self) -> Option<Connection> {
        let id = self.master.take()?;
        self.connections.shift_remove(&id)
    }

    /// The attached master, if any.
    pub fn current_master(&self) -> Option<&Connection> {
        self.master.and_then(|id| self.connections.get(&id))
    }

    /// Look up an attached socket.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Number of attached sockets matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Connection) -> bool) -> usize {
        self.connections.values().filter(|conn| predicate(*conn)).count()
    }

    /// Every attached socket in attach order.
    pub fn all(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// `true` when no socket is attached.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
