//! Transport-level connection tracking for the quiz server
//!
//! This module handles the server-side bookkeeping of connected sockets:
//! - Connection lifecycle (accept, disconnect)
//! - Connection ID assignment used as player and host identity
//! - Per-connection outbound queues feeding each socket writer
//! - Capacity limits
//!
//! It knows nothing about games; which session a connection belongs to is the
//! dispatcher's concern.

use log::{debug, info};
use shared::{ConnectionId, ServerMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Represents one accepted connection
///
/// Each client maintains:
/// - Connection metadata (ID, address, connect time)
/// - The queue its socket writer drains
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// When the connection was accepted
    pub connected_at: Instant,
    /// Messages delivered to this connection so far
    pub messages_sent: u64,
    /// Outbound queue drained by the connection's writer task
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl Client {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            messages_sent: 0,
            sender,
        }
    }

    /// Queues a message for the socket writer
    ///
    /// Returns false when the writer has already gone away, which happens
    /// between a socket closing and the disconnect being processed.
    pub fn send(&mut self, message: ServerMessage) -> bool {
        if self.sender.send(message).is_ok() {
            self.messages_sent += 1;
            true
        } else {
            false
        }
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Manages all accepted connections
///
/// The ClientManager enforces server capacity and hands out connection IDs
/// that are never reused while the process runs, so a late message for a
/// departed connection can never reach a newcomer.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<ConnectionId, Client>,
    /// Next available ID for new connections
    next_client_id: ConnectionId,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to register a new connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Option<ConnectionId> {
        // Enforce server capacity limits
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    /// Removes a connection
    ///
    /// Returns true if the client was found and removed, false if they were
    /// already gone.
    pub fn remove_client(&mut self, client_id: &ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected after {:.1}s ({} messages sent)",
                client.id,
                client.connected_for().as_secs_f32(),
                client.messages_sent
            );
            true
        } else {
            false
        }
    }

    /// Queues a message for one connection
    ///
    /// Unknown or closing connections are skipped; delivery is best effort.
    pub fn send_to(&mut self, client_id: ConnectionId, message: ServerMessage) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => client.send(message),
            None => {
                debug!("Dropping message for unknown client {}", client_id);
                false
            }
        }
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
