//! Locally replicated game state
//!
//! Every node holds its own copy of all player positions and scores. The
//! local entry is authoritative. Remote entries are whatever the newest
//! state-sync or accepted reveal said, ordered by the sender's move counter:
//! an update older than the one already applied is ignored.

use serde::{Deserialize, Serialize};
use shared::{Coord, PlayerId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// How many past (seq, position) pairs are kept per remote player
const MOVE_HISTORY_LEN: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStateReplica {
    pub player_locations: HashMap<PlayerId, Coord>,
    pub scores: HashMap<PlayerId, u32>,
    pub prey_position: Coord,
}

impl GameStateReplica {
    pub fn new(local_id: &str, start: Coord, prey_position: Coord) -> Self {
        let mut replica = Self {
            prey_position,
            ..Self::default()
        };
        replica.set_location(local_id, start);
        replica
    }

    fn set_location(&mut self, player_id: &str, coord: Coord) -> Option<Coord> {
        self.scores.entry(player_id.to_string()).or_insert(0);
        self.player_locations.insert(player_id.to_string(), coord)
    }
}

/// Result of applying a local move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMove {
    pub previous: Coord,
    pub seq: u64,
}

#[derive(Debug)]
struct Replicated {
    replica: GameStateReplica,
    local_seq: u64,
    // Newest last
    history: HashMap<PlayerId, VecDeque<(u64, Coord)>>,
}

/// Lock-guarded handle to the replica, cloned into every task that needs it
#[derive(Clone)]
pub struct StateSynchronizer {
    local_id: PlayerId,
    inner: Arc<RwLock<Replicated>>,
}

impl StateSynchronizer {
    pub fn new(local_id: PlayerId, start: Coord, prey_position: Coord) -> Self {
        let replica = GameStateReplica::new(&local_id, start, prey_position);
        Self {
            local_id,
            inner: Arc::new(RwLock::new(Replicated {
                replica,
                local_seq: 0,
                history: HashMap::new(),
            })),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Moves the local player and bumps the local move counter.
    ///
    /// Only called after the validator approved the move.
    pub async fn apply_local_move(&self, coord: Coord) -> LocalMove {
        let mut inner = self.inner.write().await;
        inner.local_seq += 1;
        let previous = inner.replica.set_location(&self.local_id, coord).unwrap_or(coord);
        LocalMove {
            previous,
            seq: inner.local_seq,
        }
    }

    /// Records a peer's position as of its move `seq`.
    ///
    /// Returns false when the update was ignored: it targets the local player
    /// or an older move than the one already applied.
    pub async fn apply_remote_update(&self, peer_id: &str, coord: Coord, seq: u64) -> bool {
        if peer_id == self.local_id {
            return false;
        }

        let mut inner = self.inner.write().await;
        let history = inner.history.entry(peer_id.to_string()).or_default();
        match history.back_mut() {
            Some((latest, _)) if seq < *latest => return false,
            Some((latest, position)) if seq == *latest => *position = coord,
            _ => {
                if history.len() == MOVE_HISTORY_LEN {
                    history.pop_front();
                }
                history.push_back((seq, coord));
            }
        }
        inner.replica.set_location(peer_id, coord);
        true
    }

    pub async fn set_score(&self, player_id: &str, score: u32) {
        self.inner
            .write()
            .await
            .replica
            .scores
            .insert(player_id.to_string(), score);
    }

    /// Copies the replica under the read lock.
    pub async fn snapshot(&self) -> GameStateReplica {
        self.inner.read().await.replica.clone()
    }

    pub async fn local_position(&self) -> Coord {
        self.local_state().await.0
    }

    /// Local position together with the move counter that produced it.
    pub async fn local_state(&self) -> (Coord, u64) {
        let inner = self.inner.read().await;
        let position = inner
            .replica
            .player_locations
            .get(&self.local_id)
            .copied()
            .unwrap_or_default();
        (position, inner.local_seq)
    }

    pub async fn position_of(&self, player_id: &str) -> Option<Coord> {
        self.inner.read().await.replica.player_locations.get(player_id).copied()
    }

    /// Where a remote player stood after its move `seq`, if still remembered.
    pub async fn position_at(&self, player_id: &str, seq: u64) -> Option<Coord> {
        let inner = self.inner.read().await;
        inner
            .history
            .get(player_id)?
            .iter()
            .find(|(known, _)| *known == seq)
            .map(|(_, coord)| *coord)
    }

    /// Newest move counter applied for a remote player.
    pub async fn seq_of(&self, player_id: &str) -> Option<u64> {
        let inner = self.inner.read().await;
        inner.history.get(player_id)?.back().map(|(seq, _)| *seq)
    }

    pub async fn score_of(&self, player_id: &str) -> u32 {
        self.inner
            .read()
            .await
            .replica
            .scores
            .get(player_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn prey_position(&self) -> Coord {
        self.inner.read().await.replica.prey_position
    }
}
