//! Outbound delivery seam between sessions and the transport.

use log::warn;
use shared::{ConnectionId, ServerMessage};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Fire-and-forget delivery of a message to one connection.
///
/// Implementations must keep per-connection order. Delivery failures are the
/// implementation's problem and never reach the caller.
pub trait Gateway: Send + Sync {
    fn send(&self, connection_id: ConnectionId, message: ServerMessage);
}

/// A message queued for the network sender task.
#[derive(Debug)]
pub struct Outgoing {
    pub connection_id: ConnectionId,
    pub message: ServerMessage,
}

/// Gateway backed by a single queue drained by the network sender task.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl OutboundQueue {
    pub fn new(tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { tx }
    }
}

impl Gateway for OutboundQueue {
    fn send(&self, connection_id: ConnectionId, message: ServerMessage) {
        if let Err(e) = self.tx.send(Outgoing {
            connection_id,
            message,
        }) {
            warn!("Dropping message for client {}: {}", connection_id, e);
        }
    }
}

/// Gateway that keeps everything it is given, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    sent: Mutex<Vec<(ConnectionId, ServerMessage)>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered to one connection, oldest first.
    pub fn messages_for(&self, connection_id: ConnectionId) -> Vec<ServerMessage> {
        self.lock()
            .iter()
            .filter(|(id, _)| *id == connection_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn last_for(&self, connection_id: ConnectionId) -> Option<ServerMessage> {
        self.messages_for(connection_id).pop()
    }

    pub fn take_all(&self) -> Vec<(ConnectionId, ServerMessage)> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ConnectionId, ServerMessage)>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Gateway for MemoryGateway {
    fn send(&self, connection_id: ConnectionId, message: ServerMessage) {
        self.lock().push((connection_id, message));
    }
}
