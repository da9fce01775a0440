//! Runtime configuration for the relay server

use clap::ValueEnum;
use shared::DEFAULT_PORT;
use std::path::PathBuf;
use std::time::Duration;

/// What the broker does with a movement payload that lacks required fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MovementPolicy {
    /// Drop the event and log it.
    #[default]
    Reject,
    /// Fill missing fields from the session's last-known state.
    Coerce,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to, e.g. `0.0.0.0:8081`.
    pub bind_addr: String,
    /// Directory served as static presentation assets.
    pub public_dir: PathBuf,
    pub max_players: usize,
    /// Connections silent for longer than this are dropped. None disables the sweep.
    pub idle_timeout: Option<Duration>,
    pub movement_policy: MovementPolicy,
}

impl ServerConfig {
    /// Builds a config from the command-line representation of the idle timeout,
    /// where zero seconds disables it.
    pub fn idle_timeout_from_secs(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// How often the server pings each connection.
    ///
    /// Derived from the idle timeout so that a client answering pings is
    /// never mistaken for a silent one.
    pub fn heartbeat_interval(&self) -> Duration {
        Self::heartbeat_for(self.idle_timeout)
    }

    /// Pings go out often enough that a live client answers well inside the timeout.
    pub fn heartbeat_for(idle_timeout: Option<Duration>) -> Duration {
        match idle_timeout {
            Some(timeout) => (timeout / 3).max(Duration::from_millis(100)),
            None => Duration::from_secs(10),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            public_dir: PathBuf::from("public"),
            max_players: 32,
            idle_timeout: Some(Duration::from_secs(30)),
            movement_policy: MovementPolicy::Reject,
        }
    }
}
