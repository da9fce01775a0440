//! Wire protocol shared by the relay server and its clients.
//!
//! Every WebSocket text frame carries one JSON envelope of the form
//! `{"event": <name>, "data": <payload>}`. Inbound frames decode into
//! [`ClientEvent`], outbound frames are produced from [`ServerEvent`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub const WORLD_WIDTH: f64 = 800.0;
pub const WORLD_HEIGHT: f64 = 600.0;
/// Distance from the world edges that spawn points keep clear of.
pub const SPAWN_MARGIN: u32 = 50;
pub const DEFAULT_PORT: u16 = 8081;
/// Path of the WebSocket upgrade endpoint.
pub const EVENT_PATH: &str = "/ws";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Identifier of one connection and of the session it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blue,
}

/// Server-side record of one connected player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub player_id: SessionId,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub flip_x: bool,
    pub team: Team,
}

impl Session {
    pub fn new(player_id: SessionId, x: f64, y: f64, team: Team) -> Self {
        Self {
            player_id,
            x,
            y,
            rotation: 0.0,
            flip_x: false,
            team,
        }
    }

    /// Overwrites the mutable fields with a resolved movement.
    ///
    /// A movement without a rotation leaves the current rotation in place.
    pub fn apply(&mut self, movement: &Movement) {
        self.x = movement.x;
        self.y = movement.y;
        if let Some(rotation) = movement.rotation {
            self.rotation = rotation;
        }
        self.flip_x = movement.flip_x;
    }
}

/// Movement payload exactly as a client sent it.
///
/// Every field is optional here so that incomplete payloads still decode and
/// the server can decide what to do with them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MovementPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flip_x: Option<bool>,
}

impl MovementPayload {
    pub fn new(x: f64, y: f64, flip_x: bool) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            rotation: None,
            flip_x: Some(flip_x),
        }
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Returns the movement if every required field is present.
    pub fn complete(&self) -> Option<Movement> {
        Some(Movement {
            x: self.x?,
            y: self.y?,
            rotation: self.rotation,
            flip_x: self.flip_x?,
        })
    }

    /// Fills missing fields from the session's last-known state.
    pub fn or_last_known(&self, session: &Session) -> Movement {
        Movement {
            x: self.x.unwrap_or(session.x),
            y: self.y.unwrap_or(session.y),
            rotation: self.rotation,
            flip_x: self.flip_x.unwrap_or(session.flip_x),
        }
    }
}

/// A movement with all required fields resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    pub x: f64,
    pub y: f64,
    pub rotation: Option<f64>,
    pub flip_x: bool,
}

/// Events sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    PlayerMovement(MovementPayload),
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Handshake telling a freshly accepted client its own id.
    Connect {
        #[serde(rename = "playerId")]
        player_id: SessionId,
    },
    CurrentPlayers(HashMap<SessionId, Session>),
    NewPlayer(Session),
    PlayerMoved(Session),
    PlayerDisconnect(SessionId),
}

impl ServerEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connect { .. } => "connect",
            ServerEvent::CurrentPlayers(_) => "currentPlayers",
            ServerEvent::NewPlayer(_) => "newPlayer",
            ServerEvent::PlayerMoved(_) => "playerMoved",
            ServerEvent::PlayerDisconnect(_) => "playerDisconnect",
        }
    }
}
