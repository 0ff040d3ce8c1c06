//! # Player Node Library
//!
//! This library is the logic core of one player in a peer-to-peer grid game.
//! There is no authoritative game server: every node keeps its own replica of
//! all player positions and scores, tells its peers about its own moves, and
//! checks theirs before believing them.
//!
//! ## Architecture Overview
//!
//! A node registers once with the coordinator to learn its player id, the
//! game settings and who else is playing. From then on it talks to peers
//! directly over a single UDP socket. Each long-running concern is its own
//! task watching a shared shutdown channel, and each shared structure (peer
//! table, replica) sits behind its own lock and is handed to the tasks that
//! need it at startup.
//!
//! ### Commit-Reveal Moves
//! A move is announced to peers as a hash commitment followed by a reveal of
//! the destination and nonce. Peers only apply the reveal if it matches the
//! commitment and is a legal single step from where the player stood before
//! that move. Landing on the prey adds a score claim, which peers accept only
//! right after a reveal that ended on the prey. Every move carries the
//! mover's move counter so late packets never rewind a position.
//!
//! ### Reliability
//! Game messages are signed, acknowledged and retried. Peers that keep
//! dropping messages or go quiet are pruned locally; their last known
//! position stays on display.
//!
//! ## Module Organization
//!
//! ### Membership (`membership`)
//! Registration, heartbeats and roster refreshes against the coordinator:
//! - `Coordinator` trait over the request/response channel
//! - Re-registration on heartbeat failure
//! - Discovery flood towards newly learned peers
//!
//! ### Transport (`transport`, `network`)
//! The UDP socket and the packet dispatcher:
//! - Tagged `Packet` decoding at the boundary
//! - Discovery handshake and state-sync gossip
//! - Signature checks and acks for reliable messages
//!
//! ### Reliability (`acks`, `identity`, `pruner`)
//! - Outstanding message table with oldest-first retries
//! - Ordered follow-ups for commit, reveal and score claim
//! - One move chain in flight per peer, later ones queued behind it
//! - Liveness pruning with tombstones
//!
//! ### Game State (`state`, `validator`)
//! - Replicated positions and scores
//! - Move, commitment, reveal, capture and score checks
//!
//! ### Orchestration (`node`)
//! `PlayerNode` builds everything above, spawns the background tasks and
//! turns player commands into moves.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use node::membership::TcpCoordinator;
//! use node::node::{NodeSettings, PlayerNode};
//! use shared::Ed25519Crypto;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = TcpCoordinator::new("127.0.0.1:8081", Duration::from_secs(2));
//!     let node = PlayerNode::start(
//!         NodeSettings::default(),
//!         coordinator,
//!         Arc::new(Ed25519Crypto::generate()),
//!     )
//!     .await?;
//!
//!     node.handle_command("up").await;
//!     node.stop().await;
//!     Ok(())
//! }
//! ```

pub mod acks;
pub mod identity;
pub mod membership;
pub mod network;
pub mod node;
pub mod peers;
pub mod pruner;
pub mod state;
pub mod transport;
pub mod validator;
