use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use callbridge_protocol::ServerMessage;
use tokio::sync::mpsc;

/// Identifier the relay assigns to every accepted websocket connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn new(inner: u64) -> Self {
        Self(inner)
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owning reference to a live connection: its id and the queue drained by its writer task.
///
/// Messages pushed through one handle are delivered in order.
/// Clones share the closed flag, once [`ConnectionHandle::close`] was called
/// the connection must not be bound into new rooms or invites.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerMessage>,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for delivery. Returns `false` if the connection is already gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Mark the connection as gone. Called before its rooms and invites are cleaned up.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn close_is_shared_between_clones() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(ConnectionId::new(1), tx);
        let registered = handle.clone();
        assert!(!registered.is_closed());

        handle.close();
        assert!(registered.is_closed());
    }
}
