//! Move validation and commit-reveal anti-cheat
//!
//! Every node checks every move against the same geometry rules: its own
//! moves before broadcasting them, and its peers' moves before merging them.
//! Remote moves travel as a commitment (hash of destination and nonce)
//! followed by a reveal, so a peer cannot pick its move after seeing the
//! others'. Each peer has at most one open commitment at a time.
//!
//! The last accepted reveal of each peer is kept until the next message from
//! that peer, since a score claim is only valid directly after a reveal that
//! ended on the prey.

use crate::state::StateSynchronizer;
use log::debug;
use shared::{commit_hash, Coord, Direction, GameConfig, Geometry, PlayerId, ValidationError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Committed,
    Revealed,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct MoveCommitment {
    pub committer_id: PlayerId,
    pub commit_hash: [u8; 32],
    pub nonce: Option<u64>,
    pub revealed_move: Option<Coord>,
    pub state: CommitState,
    pub committed_at: Instant,
}

impl MoveCommitment {
    fn new(committer_id: PlayerId, commit_hash: [u8; 32], now: Instant) -> Self {
        Self {
            committer_id,
            commit_hash,
            nonce: None,
            revealed_move: None,
            state: CommitState::Committed,
            committed_at: now,
        }
    }

    fn is_open(&self, now: Instant, timeout: Duration) -> bool {
        self.state == CommitState::Committed && now.saturating_duration_since(self.committed_at) <= timeout
    }
}

pub struct MoveValidator {
    geometry: Arc<dyn Geometry>,
    state: StateSynchronizer,
    initial_position: Coord,
    prey_position: Coord,
    commit_timeout: Duration,
    commitments: Mutex<HashMap<PlayerId, MoveCommitment>>,
    last_reveals: Mutex<HashMap<PlayerId, MoveCommitment>>,
    // Peers whose last validated action was a prey capture
    captures: Mutex<HashSet<PlayerId>>,
}

impl MoveValidator {
    pub fn new(geometry: Arc<dyn Geometry>, state: StateSynchronizer, config: &GameConfig) -> Self {
        Self {
            geometry,
            state,
            initial_position: config.initial_position,
            prey_position: config.prey_position,
            commit_timeout: config.commit_timeout(),
            commitments: Mutex::new(HashMap::new()),
            last_reveals: Mutex::new(HashMap::new()),
            captures: Mutex::new(HashSet::new()),
        }
    }

    /// Computes the local player's next cell and whether the rules allow it.
    pub async fn validate_local_move(&self, direction: Direction) -> (Coord, bool) {
        let current = self.state.local_position().await;
        let candidate = current.step(direction);
        let accepted = self.check_move(current, candidate).is_ok();
        (candidate, accepted)
    }

    pub fn check_move(&self, from: Coord, to: Coord) -> Result<(), ValidationError> {
        if !self.geometry.is_valid_move(to) {
            return Err(ValidationError::OutOfBounds(to.to_string()));
        }
        if !self.geometry.is_not_teleporting(from, to) {
            return Err(ValidationError::InvalidMove(format!("{} -> {} is not a single step", from, to)));
        }
        Ok(())
    }

    /// Opens a commitment for `peer_id`.
    pub async fn validate_commitment(
        &self,
        peer_id: &str,
        committer_id: &str,
        commit_hash: [u8; 32],
        now: Instant,
    ) -> Result<(), ValidationError> {
        self.captures.lock().await.remove(peer_id);
        self.last_reveals.lock().await.remove(peer_id);

        if committer_id != peer_id {
            return Err(ValidationError::IncorrectPlayer(format!(
                "peer {} sent a commitment claimed by {}",
                peer_id, committer_id
            )));
        }

        let mut commitments = self.commitments.lock().await;
        if let Some(existing) = commitments.get(peer_id) {
            if existing.is_open(now, self.commit_timeout) {
                return Err(ValidationError::IncorrectPlayer(format!(
                    "peer {} already has an open commitment",
                    peer_id
                )));
            }
        }

        commitments.insert(
            peer_id.to_string(),
            MoveCommitment::new(committer_id.to_string(), commit_hash, now),
        );
        Ok(())
    }

    /// Closes the peer's commitment with the reveal of its move number `seq`.
    ///
    /// Returns the destination to merge into the replica when the hash matches
    /// and `from -> destination` is a legal step. `from` must agree with where
    /// this node saw the peer after its previous move, when that is still
    /// remembered.
    pub async fn validate_reveal(
        &self,
        peer_id: &str,
        seq: u64,
        from: Coord,
        destination: Coord,
        nonce: u64,
    ) -> Result<Coord, ValidationError> {
        self.captures.lock().await.remove(peer_id);
        self.last_reveals.lock().await.remove(peer_id);

        let mut commitment = self
            .commitments
            .lock()
            .await
            .remove(peer_id)
            .ok_or_else(|| ValidationError::IncorrectPlayer(format!("peer {} has no open commitment", peer_id)))?;

        commitment.nonce = Some(nonce);
        commitment.revealed_move = Some(destination);

        if commit_hash(destination, nonce) != commitment.commit_hash {
            commitment.state = CommitState::Rejected;
            return Err(ValidationError::InvalidMove(format!(
                "reveal from {} does not match its commitment",
                peer_id
            )));
        }

        let known_start = match seq.checked_sub(1) {
            None => {
                commitment.state = CommitState::Rejected;
                return Err(ValidationError::InvalidMove(format!("peer {} revealed move 0", peer_id)));
            }
            Some(0) => Some(self.initial_position),
            Some(previous) => self.state.position_at(peer_id, previous).await,
        };
        if let Some(known_start) = known_start {
            if known_start != from {
                commitment.state = CommitState::Rejected;
                return Err(ValidationError::InvalidMove(format!(
                    "move {} of {} starts at {} but the peer stood at {}",
                    seq, peer_id, from, known_start
                )));
            }
        }
        if let Err(e) = self.check_move(from, destination) {
            commitment.state = CommitState::Rejected;
            return Err(e);
        }

        commitment.state = CommitState::Revealed;
        debug!("Peer {} revealed move {} to {}", commitment.committer_id, seq, destination);
        self.last_reveals.lock().await.insert(peer_id.to_string(), commitment);
        Ok(destination)
    }

    /// Accepts a capture only when the peer's last accepted reveal ended on
    /// the prey. The reveal is consumed.
    pub async fn validate_captured_prey(&self, peer_id: &str) -> Result<(), ValidationError> {
        let revealed = self
            .last_reveals
            .lock()
            .await
            .remove(peer_id)
            .and_then(|commitment| commitment.revealed_move);
        let mut captures = self.captures.lock().await;

        if revealed == Some(self.prey_position) {
            captures.insert(peer_id.to_string());
            Ok(())
        } else {
            captures.remove(peer_id);
            Err(ValidationError::InvalidPreyCapture(peer_id.to_string()))
        }
    }

    /// Accepts a score claim only right after a verified capture and only for
    /// a single point.
    pub async fn validate_score_update(&self, peer_id: &str, claimed_score: u32) -> Result<(), ValidationError> {
        let captured = self.captures.lock().await.remove(peer_id);
        if !captured {
            return Err(ValidationError::InvalidScoreUpdate(claimed_score));
        }

        let current = self.state.score_of(peer_id).await;
        if claimed_score != current + 1 {
            return Err(ValidationError::InvalidScoreUpdate(claimed_score));
        }
        Ok(())
    }

    /// Evicts commitments that were never revealed in time.
    pub async fn expire_commitments(&self, now: Instant) -> Vec<PlayerId> {
        let timeout = self.commit_timeout;
        let mut commitments = self.commitments.lock().await;
        let expired: Vec<PlayerId> = commitments
            .iter()
            .filter(|(_, commitment)| !commitment.is_open(now, timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            commitments.remove(id);
        }
        expired
    }

    pub async fn forget_peer(&self, peer_id: &str) {
        self.commitments.lock().await.remove(peer_id);
        self.last_reveals.lock().await.remove(peer_id);
        self.captures.lock().await.remove(peer_id);
    }

    pub async fn open_commitments(&self) -> usize {
        self.commitments.lock().await.len()
    }
}
