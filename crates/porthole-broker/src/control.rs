//! Handle for a tunnel's control connection
//!
//! The transport side owns the socket; it creates a handle/receiver pair,
//! registers the handle with the broker, and pumps received messages onto
//! the wire. Dropping the handle (e.g. when the tunnel is removed) closes
//! the channel, which the writer task observes and uses to shut the socket.

use porthole_proto::ControlMessage;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sending on a closed control connection
#[derive(Debug, Error)]
#[error("Control connection is closed")]
pub struct ControlSendError;

/// Sender half of a tunnel's control connection
#[derive(Debug, Clone)]
pub struct ControlHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlHandle {
    /// Create a handle and the receiver its writer task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Identity of this handle, distinct across reconnections of the same tunnel
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a message for the owner; fails once the writer task is gone
    pub fn send(&self, message: ControlMessage) -> Result<(), ControlSendError> {
        self.tx.send(message).map_err(|_| ControlSendError)
    }

    /// The connection counts as live while its writer task still drains the channel
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
