//! # Coordinator Library
//!
//! This library provides the rendezvous server that player nodes register with
//! before play starts. It hands every node its identity and the shared game
//! settings, tells nodes about each other, and forgets nodes that stop sending
//! heartbeats. Once nodes know each other they talk directly over UDP; the
//! coordinator never sees game traffic.
//!
//! ## Core Responsibilities
//!
//! ### Registration
//! A node submits its UDP listen address and public key. The coordinator
//! rejects duplicate keys and duplicate addresses, otherwise assigns a player
//! id and answers with the `GameConfig` every node plays by. A key that
//! registers again after timing out gets its old id back.
//!
//! ### Roster Queries
//! `GetNodes` returns every other live node with its address and public key,
//! which is all a node needs to open the discovery handshake and verify its
//! peers' signed messages.
//!
//! ### Liveness
//! Heartbeats refresh a node's entry; a background task drops entries that go
//! quiet for longer than the configured timeout.
//!
//! ## Protocol
//!
//! Requests and responses are bincode-encoded `ServerRequest` /
//! `ServerResponse` values from the `shared` crate, each framed by a
//! big-endian `u32` length on a TCP stream. A node keeps one connection open
//! and issues calls sequentially.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use coordinator::network::Server;
//! use shared::GameConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let server = Server::new("127.0.0.1:8081", GameConfig::default(), Duration::from_secs(5))
//!         .await
//!         .map_err(|e| e.to_string())?;
//!     server.run().await
//! }
//! ```

pub mod network;
pub mod registry;
