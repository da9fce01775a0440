//! Connection broker: session lifecycle and event dispatch
//!
//! The broker is the only writer of the session registry. Each handler runs
//! to completion on the server's event loop, performing its registry
//! read-modify-write and then enqueueing the resulting events through the
//! fan-out. Nothing here waits on network I/O.
//!
//! Lifecycle of one connection:
//! - `on_connect` assigns an id, spawns a session, sends the new client the
//!   full `currentPlayers` snapshot and announces `newPlayer` to everyone else
//! - `on_move` (via `dispatch`) updates the sender's session and broadcasts
//!   `playerMoved` to everyone else
//! - `on_disconnect` removes the session and broadcasts `playerDisconnect`
//!   to every remaining connection

use crate::client_manager::ClientManager;
use crate::config::{MovementPolicy, ServerConfig};
use crate::fanout::{Fanout, Outbound};
use crate::registry::Registry;
use crate::spawn::{RandomSpawn, SpawnStrategy};
use log::{debug, info, warn};
use shared::{ClientEvent, MovementPayload, ServerEvent, Session, SessionId};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("server full ({capacity} players)")]
    ServerFull { capacity: usize },
}

pub struct Broker {
    registry: Registry,
    fanout: Fanout,
    clients: ClientManager,
    spawner: Box<dyn SpawnStrategy>,
    policy: MovementPolicy,
    max_players: usize,
}

impl Broker {
    pub fn new(
        max_players: usize,
        policy: MovementPolicy,
        spawner: Box<dyn SpawnStrategy>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            fanout: Fanout::new(),
            clients: ClientManager::new(max_players),
            spawner,
            policy,
            max_players,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.max_players,
            config.movement_policy,
            Box::new(RandomSpawn::from_entropy()),
        )
    }

    /// Accepts a new connection and creates its session.
    ///
    /// The new client receives the registry snapshot (including itself) and
    /// every other client receives the new session.
    pub fn on_connect(
        &mut self,
        addr: SocketAddr,
        outbound: Outbound,
    ) -> Result<Session, BrokerError> {
        let id = self
            .clients
            .add_client(addr)
            .ok_or(BrokerError::ServerFull {
                capacity: self.max_players,
            })?;

        let (x, y) = self.spawner.spawn_point();
        let team = self.spawner.team();
        let session = Session::new(id, x, y, team);

        self.registry.insert(session.clone());
        self.fanout.attach(id, outbound);

        self.fanout
            .send_to(id, &ServerEvent::CurrentPlayers(self.registry.snapshot()));
        self.fanout
            .broadcast_others(id, &ServerEvent::NewPlayer(session.clone()));

        info!(
            "Player {} joined team {:?} at ({}, {}), {} online",
            id,
            team,
            x,
            y,
            self.registry.len()
        );
        Ok(session)
    }

    /// Routes an inbound event to its handler.
    ///
    /// Returns true if the event changed the registry.
    pub fn dispatch(&mut self, id: SessionId, event: ClientEvent) -> bool {
        match event {
            ClientEvent::PlayerMovement(payload) => self.on_move(id, &payload),
        }
    }

    /// Applies a movement to the sender's own session and broadcasts it to everyone else.
    ///
    /// Movements from unknown sessions are ignored. Incomplete payloads are
    /// handled according to the configured [`MovementPolicy`].
    pub fn on_move(&mut self, id: SessionId, payload: &MovementPayload) -> bool {
        let Some(current) = self.registry.get(id) else {
            debug!("Ignoring movement from unknown session {}", id);
            return false;
        };

        let movement = match self.policy {
            MovementPolicy::Reject => match payload.complete() {
                Some(movement) => movement,
                None => {
                    warn!("Dropping incomplete movement from {}: {:?}", id, payload);
                    return false;
                }
            },
            MovementPolicy::Coerce => payload.or_last_known(current),
        };

        let Some(updated) = self.registry.apply_movement(id, &movement) else {
            return false;
        };
        let event = ServerEvent::PlayerMoved(updated.clone());

        let delivered = self.fanout.broadcast_others(id, &event);
        debug!(
            "Player {} moved to ({}, {}), relayed to {}",
            id, movement.x, movement.y, delivered
        );
        true
    }

    /// Removes the connection's session and announces it to every remaining connection.
    ///
    /// Disconnecting an unknown or already removed session is a no-op and
    /// broadcasts nothing.
    pub fn on_disconnect(&mut self, id: SessionId) -> Option<Session> {
        self.fanout.detach(id);
        self.clients.remove_client(id);

        match self.registry.remove(id) {
            Some(session) => {
                self.fanout.broadcast_all(&ServerEvent::PlayerDisconnect(id));
                info!("Player {} left, {} online", id, self.registry.len());
                Some(session)
            }
            None => {
                debug!("Disconnect for unknown session {}", id);
                None
            }
        }
    }

    /// Records inbound activity on a connection.
    pub fn touch(&mut self, id: SessionId) {
        self.clients.touch(id);
    }

    /// Disconnects every connection that has been silent for longer than `timeout`.
    pub fn expire_idle(&mut self, timeout: Duration) -> Vec<SessionId> {
        let expired = self.clients.timed_out(timeout);
        for id in &expired {
            warn!("Client {} timed out after {:?} of silence", id, timeout);
            self.on_disconnect(*id);
        }
        expired
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::FixedSpawn;
    use shared::Team;
    use std::collections::HashSet;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn test_broker(policy: MovementPolicy) -> Broker {
        let spawns = vec![
            (100.0, 100.0, Team::Red),
            (200.0, 200.0, Team::Blue),
            (300.0, 300.0, Team::Red),
        ];
        Broker::new(8, policy, Box::new(FixedSpawn::new(spawns)))
    }

    fn connect(broker: &mut Broker) -> (Session, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = broker.on_connect(test_addr(), tx).unwrap();
        (session, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_connect_creates_session_and_snapshot() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (session, mut rx) = connect(&mut broker);

        assert_eq!(session.x, 100.0);
        assert_eq!(session.y, 100.0);
        assert_eq!(session.rotation, 0.0);
        assert_eq!(session.team, Team::Red);
        assert!(broker.registry().contains(session.player_id));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::CurrentPlayers(players) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players.get(&session.player_id), Some(&session));
            }
            other => panic!("Unexpected event: {}", other.name()),
        }
    }

    #[test]
    fn test_connect_announces_to_others_only() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (a, mut rx_a) = connect(&mut broker);
        drain(&mut rx_a);

        let (b, mut rx_b) = connect(&mut broker);

        assert_eq!(drain(&mut rx_a), vec![ServerEvent::NewPlayer(b.clone())]);

        let events = drain(&mut rx_b);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::CurrentPlayers(players) => {
                let keys: HashSet<_> = players.keys().copied().collect();
                assert_eq!(keys, HashSet::from([a.player_id, b.player_id]));
            }
            other => panic!("Unexpected event: {}", other.name()),
        }
    }

    #[test]
    fn test_connect_refused_when_full() {
        let mut broker = Broker::new(
            1,
            MovementPolicy::Reject,
            Box::new(FixedSpawn::new(vec![(100.0, 100.0, Team::Blue)])),
        );
        let (_a, mut rx_a) = connect(&mut broker);
        drain(&mut rx_a);

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = broker.on_connect(test_addr(), tx);

        assert_eq!(result, Err(BrokerError::ServerFull { capacity: 1 }));
        assert_eq!(broker.session_count(), 1);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_move_updates_only_sender_and_skips_echo() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (a, mut rx_a) = connect(&mut broker);
        let (b, mut rx_b) = connect(&mut broker);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let changed = broker.dispatch(
            b.player_id,
            ClientEvent::PlayerMovement(MovementPayload::new(120.0, 80.0, true)),
        );
        assert!(changed);

        let moved = broker.registry().get(b.player_id).unwrap();
        assert_eq!((moved.x, moved.y, moved.flip_x), (120.0, 80.0, true));
        assert_eq!(moved.team, b.team);
        assert_eq!(broker.registry().get(a.player_id), Some(&a));

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::PlayerMoved(moved.clone())]
        );
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_move_without_rotation_keeps_previous() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (a, _rx) = connect(&mut broker);

        let turned = MovementPayload::new(1.0, 2.0, false).with_rotation(0.5);
        broker.on_move(a.player_id, &turned);
        broker.on_move(a.player_id, &MovementPayload::new(3.0, 4.0, false));

        let session = broker.registry().get(a.player_id).unwrap();
        assert_eq!(session.rotation, 0.5);
        assert_eq!(session.x, 3.0);
    }

    #[test]
    fn test_move_from_unknown_session_is_noop() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (a, mut rx_a) = connect(&mut broker);
        drain(&mut rx_a);

        let before = broker.registry().clone();
        let payload = MovementPayload::new(1.0, 1.0, true);
        assert!(!broker.on_move(SessionId(999), &payload));

        assert_eq!(broker.registry(), &before);
        assert!(drain(&mut rx_a).is_empty());
        assert!(broker.registry().contains(a.player_id));
    }

    #[test]
    fn test_reject_policy_drops_incomplete_payload() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (a, _rx_a) = connect(&mut broker);
        let (_b, mut rx_b) = connect(&mut broker);
        drain(&mut rx_b);

        let payload = MovementPayload {
            x: Some(500.0),
            ..Default::default()
        };
        assert!(!broker.on_move(a.player_id, &payload));

        assert_eq!(broker.registry().get(a.player_id), Some(&a));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_coerce_policy_fills_last_known_values() {
        let mut broker = test_broker(MovementPolicy::Coerce);
        let (a, _rx_a) = connect(&mut broker);
        let (_b, mut rx_b) = connect(&mut broker);
        drain(&mut rx_b);

        let payload = MovementPayload {
            x: Some(500.0),
            ..Default::default()
        };
        assert!(broker.on_move(a.player_id, &payload));

        let session = broker.registry().get(a.player_id).unwrap();
        assert_eq!(session.x, 500.0);
        assert_eq!(session.y, a.y);
        assert_eq!(session.flip_x, a.flip_x);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_disconnect_removes_and_announces_once() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (a, mut rx_a) = connect(&mut broker);
        let (b, mut rx_b) = connect(&mut broker);
        let (c, mut rx_c) = connect(&mut broker);
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        let removed = broker.on_disconnect(a.player_id);
        assert_eq!(removed.map(|s| s.player_id), Some(a.player_id));
        assert!(!broker.registry().contains(a.player_id));

        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::PlayerDisconnect(a.player_id)]
        );
        assert_eq!(
            drain(&mut rx_c),
            vec![ServerEvent::PlayerDisconnect(a.player_id)]
        );
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        assert!(broker.on_disconnect(a.player_id).is_none());
        assert!(drain(&mut rx_b).is_empty());

        let mut ids = broker.registry().ids();
        ids.sort();
        assert_eq!(ids, vec![b.player_id, c.player_id]);
    }

    #[test]
    fn test_closed_recipient_does_not_block_others() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (a, rx_a) = connect(&mut broker);
        let (_b, mut rx_b) = connect(&mut broker);
        let (c, mut rx_c) = connect(&mut broker);
        drop(rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        let payload = MovementPayload::new(9.0, 9.0, false);
        assert!(broker.on_move(c.player_id, &payload));
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert!(broker.registry().contains(a.player_id));
    }

    #[test]
    fn test_expire_idle_disconnects_silent_clients() {
        let mut broker = test_broker(MovementPolicy::Reject);
        let (a, _rx_a) = connect(&mut broker);
        let (b, mut rx_b) = connect(&mut broker);
        drain(&mut rx_b);

        assert!(broker.expire_idle(Duration::from_secs(60)).is_empty());

        std::thread::sleep(Duration::from_millis(20));
        broker.touch(b.player_id);
        let expired = broker.expire_idle(Duration::from_millis(10));

        assert_eq!(expired, vec![a.player_id]);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::PlayerDisconnect(a.player_id)]
        );
        assert_eq!(broker.session_count(), 1);
    }

    #[test]
    fn test_same_events_yield_same_registry() {
        let run = || {
            let mut broker = Broker::new(
                8,
                MovementPolicy::Reject,
                Box::new(RandomSpawn::seeded(11)),
            );
            let mut queues = Vec::new();
            for _ in 0..4 {
                queues.push(connect(&mut broker));
            }
            let ids: Vec<SessionId> = queues.iter().map(|(s, _)| s.player_id).collect();

            broker.on_move(ids[0], &MovementPayload::new(10.0, 20.0, true));
            let turned = MovementPayload::new(30.0, 40.0, false).with_rotation(1.0);
            broker.on_move(ids[2], &turned);
            broker.on_disconnect(ids[1]);
            broker.on_move(ids[1], &MovementPayload::new(50.0, 60.0, true));
            broker.on_move(ids[0], &MovementPayload::new(70.0, 80.0, false));
            broker.registry().clone()
        };

        let first = run();
        assert_eq!(first, run());
        assert_eq!(first.len(), 3);
        assert_eq!(first.get(SessionId(1)).map(|s| s.x), Some(70.0));
    }

    #[test]
    fn test_join_move_leave_scenario() {
        let mut broker = test_broker(MovementPolicy::Reject);

        let (a, mut rx_a) = connect(&mut broker);
        match drain(&mut rx_a).as_slice() {
            [ServerEvent::CurrentPlayers(players)] => {
                let ids: Vec<SessionId> = players.keys().copied().collect();
                assert_eq!(ids, vec![a.player_id]);
            }
            other => panic!("Unexpected events: {:?}", other),
        }

        let (b, mut rx_b) = connect(&mut broker);
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::NewPlayer(b.clone())]);
        match drain(&mut rx_b).as_slice() {
            [ServerEvent::CurrentPlayers(players)] => assert_eq!(players.len(), 2),
            other => panic!("Unexpected events: {:?}", other),
        }

        broker.on_move(b.player_id, &MovementPayload::new(120.0, 80.0, true));
        match drain(&mut rx_a).as_slice() {
            [ServerEvent::PlayerMoved(moved)] => {
                assert_eq!(moved.player_id, b.player_id);
                assert_eq!((moved.x, moved.y, moved.flip_x), (120.0, 80.0, true));
            }
            other => panic!("Unexpected events: {:?}", other),
        }
        assert!(drain(&mut rx_b).is_empty());

        broker.on_disconnect(a.player_id);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::PlayerDisconnect(a.player_id)]
        );
        assert_eq!(broker.registry().ids(), vec![b.player_id]);
    }
}
