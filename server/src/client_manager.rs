//! Connection tracking for the relay server
//!
//! This module keeps the network-side view of every open connection:
//! - Identifier assignment for new connections
//! - Capacity enforcement
//! - Last-activity tracking for idle-connection timeouts
//!
//! Player state lives in the registry; the client manager only knows who is
//! connected, from where, and when they were last heard from.

use log::info;
use shared::SessionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Represents one open connection
#[derive(Debug)]
pub struct Client {
    /// Identifier shared with the client's session
    pub id: SessionId,
    /// Peer address the connection was accepted from
    pub addr: SocketAddr,
    /// Last time any frame arrived from this client
    pub last_seen: Instant,
}

impl Client {
    /// Creates a client record that counts as active right now.
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Marks the client as heard from.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing arrived from this client within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks all open connections and hands out identifiers
///
/// Identifiers increase monotonically and are never handed out twice during
/// the lifetime of the process, so an id can never refer to two different
/// connections.
pub struct ClientManager {
    clients: HashMap<SessionId, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new connection.
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<SessionId> {
        if self.is_full() {
            return None;
        }

        let client_id = SessionId(self.next_client_id);
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Unregisters a connection.
    ///
    /// Returns true if the client was found and removed. The id is not
    /// handed out again.
    pub fn remove_client(&mut self, client_id: SessionId) -> bool {
        if let Some(client) = self.clients.remove(&client_id) {
            info!("Client {} disconnected ({})", client.id, client.addr);
            true
        } else {
            false
        }
    }

    /// Refreshes the client's activity timestamp.
    ///
    /// Called for every inbound frame, including pongs. Returns false for
    /// unknown clients.
    pub fn touch(&mut self, client_id: SessionId) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
            true
        } else {
            false
        }
    }

    /// Lists clients that have been silent for longer than `timeout`.
    ///
    /// Clients are not removed here; the caller disconnects them so that the
    /// registry and fan-out are cleaned up together.
    pub fn timed_out(&self, timeout: Duration) -> Vec<SessionId> {
        self.clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect()
    }

    /// Returns true once the number of open connections reaches the limit.
    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
