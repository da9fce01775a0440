//! # Relay Server Library
//!
//! This library provides the position relay for the multiplayer platformer.
//! Browser clients connect over a WebSocket, report their own movement, and
//! receive every other player's movement. The relay keeps an in-memory record
//! of each connected player and fans updates out to everyone else.
//!
//! ## Core Responsibilities
//!
//! ### Session Registry
//! One session per open connection holding position, rotation, facing and
//! team. The registry is the only state the relay has; it lives in memory and
//! is gone on restart.
//!
//! ### Connection Brokering
//! Handles the lifecycle of every connection:
//! - Identifier assignment and randomized spawn on connect
//! - Movement updates from the owning connection only
//! - Removal and announcement on disconnect or idle timeout
//!
//! ### Fan-out
//! Every accepted event is delivered to its recipient set (the sender, all
//! others, or everyone) without waiting on any socket. A failed delivery to
//! one connection never affects the others.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! Connection tasks translate WebSocket frames into messages on one channel.
//! A single loop owns the broker and handles each message to completion, so
//! registry updates never interleave and no locks are needed.
//!
//! ### Per-Connection Queues
//! The broker only enqueues outbound events. Each connection task drains its
//! own queue onto its socket, so a slow client only delays itself.
//!
//! ## Module Organization
//!
//! - `registry`: the session map
//! - `fanout`: recipient selection and queue delivery
//! - `client_manager`: identifiers, capacity and last-activity tracking
//! - `spawn`: spawn point and team selection, injectable for tests
//! - `broker`: connect/move/disconnect handlers and event dispatch
//! - `config`: runtime configuration
//! - `network`: axum HTTP/WebSocket transport and the event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), server::BoxError> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8081".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Serves static assets and the /ws endpoint until shut down
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod client_manager;
pub mod config;
pub mod fanout;
pub mod network;
pub mod registry;
pub mod spawn;

/// Error type returned by the server's top-level async entry points.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
