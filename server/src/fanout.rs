//! Fire-and-forget delivery of server events to connection queues
//!
//! Each open connection owns an unbounded outbound queue drained by its own
//! network task. Fan-out only enqueues, so the event loop never waits on a
//! socket. A closed queue counts as a failed delivery to that one recipient
//! and is logged; delivery to the remaining recipients continues.

use log::{debug, warn};
use shared::{ServerEvent, SessionId};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Which connections an event is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    /// Only the given connection.
    Only(SessionId),
    /// Every attached connection except the given one.
    AllExcept(SessionId),
    /// Every attached connection.
    All,
}

impl Recipients {
    fn includes(&self, id: SessionId) -> bool {
        match *self {
            Recipients::Only(target) => id == target,
            Recipients::AllExcept(origin) => id != origin,
            Recipients::All => true,
        }
    }
}

/// Outbound queues of every attached connection, keyed by session id
#[derive(Debug, Default)]
pub struct Fanout {
    outbound: HashMap<SessionId, Outbound>,
}

impl Fanout {
    /// Creates a fan-out with no attached connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a connection's outbound queue.
    ///
    /// The connection becomes a recipient of every later delivery whose
    /// recipient set includes it.
    pub fn attach(&mut self, id: SessionId, outbound: Outbound) {
        self.outbound.insert(id, outbound);
    }

    /// Drops the connection's queue; its network task sees the queue close.
    ///
    /// Returns true if the connection was attached.
    pub fn detach(&mut self, id: SessionId) -> bool {
        self.outbound.remove(&id).is_some()
    }

    /// Delivers an event to the recipient set and returns how many queues accepted it.
    pub fn deliver(&self, recipients: Recipients, event: &ServerEvent) -> usize {
        let mut delivered = 0;

        for (id, outbound) in &self.outbound {
            if !recipients.includes(*id) {
                continue;
            }

            match outbound.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    "Dropped {} for connection {}: queue closed",
                    event.name(),
                    id
                ),
            }
        }

        debug!("Fanned out {} to {} connection(s)", event.name(), delivered);
        delivered
    }

    /// Sends an event to a single connection.
    pub fn send_to(&self, id: SessionId, event: &ServerEvent) -> usize {
        self.deliver(Recipients::Only(id), event)
    }

    /// Sends an event to every connection except the one it originated from.
    pub fn broadcast_others(&self, origin: SessionId, event: &ServerEvent) -> usize {
        self.deliver(Recipients::AllExcept(origin), event)
    }

    /// Sends an event to every attached connection.
    pub fn broadcast_all(&self, event: &ServerEvent) -> usize {
        self.deliver(Recipients::All, event)
    }

    /// Number of attached connections.
    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }
}
