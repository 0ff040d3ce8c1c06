//! Periodic eviction of peers that went quiet

use crate::acks::AckTracker;
use crate::peers::SharedPeerTable;
use crate::validator::MoveValidator;
use log::{debug, info};
use shared::{GameConfig, PlayerId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub struct Pruner {
    peers: SharedPeerTable,
    acks: Arc<AckTracker>,
    validator: Arc<MoveValidator>,
    interval: Duration,
    peer_timeout: Duration,
    max_missed: u32,
}

impl Pruner {
    pub fn new(
        peers: SharedPeerTable,
        acks: Arc<AckTracker>,
        validator: Arc<MoveValidator>,
        config: &GameConfig,
    ) -> Self {
        Self {
            peers,
            acks,
            validator,
            interval: config.prune_interval(),
            peer_timeout: config.peer_timeout(),
            max_missed: config.max_missed_heartbeats,
        }
    }

    /// One pruning pass. Replica entries of pruned peers are left alone; their
    /// peer records, duplicate-id window included, are dropped.
    pub async fn tick(&self, now: Instant) -> Vec<PlayerId> {
        let pruned = {
            let mut peers = self.peers.write().await;
            peers.prune(now, self.peer_timeout, self.max_missed)
        };

        let mut ids = Vec::with_capacity(pruned.len());
        for record in pruned {
            let abandoned = self.acks.abandon_peer(&record.id).await;
            self.validator.forget_peer(&record.id).await;
            info!(
                "Pruned peer {} at {} (missed {}, {} messages abandoned)",
                record.id, record.addr, record.missed_heartbeats, abandoned
            );
            ids.push(record.id);
        }

        let expired = self.validator.expire_commitments(now).await;
        if !expired.is_empty() {
            debug!("Evicted unrevealed commitments from {:?}", expired);
        }

        ids
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeIdentity;
    use crate::peers::PeerTable;
    use crate::state::StateSynchronizer;
    use crate::transport::Transport;
    use shared::{Coord, Ed25519Crypto, GameMessage, GridManager};

    async fn setup(config: &GameConfig) -> (Pruner, SharedPeerTable, Arc<AckTracker>, StateSynchronizer) {
        let transport = Transport::bind("127.0.0.1:0").await.unwrap();
        let peers = PeerTable::shared();
        let identity = NodeIdentity::new("1".to_string(), Arc::new(Ed25519Crypto::generate()));
        let acks = Arc::new(AckTracker::new(
            transport.clone(),
            Arc::clone(&peers),
            identity,
            config.ack_timeout(),
            config.max_retries,
        ));
        let state = StateSynchronizer::new("1".to_string(), config.initial_position, config.prey_position);
        let validator = Arc::new(MoveValidator::new(
            Arc::new(GridManager::from_config(config)),
            state.clone(),
            config,
        ));
        let pruner = Pruner::new(Arc::clone(&peers), Arc::clone(&acks), validator, config);
        (pruner, peers, acks, state)
    }

    #[tokio::test]
    async fn test_prunes_peer_over_missed_threshold() {
        let config = GameConfig::default();
        let (pruner, peers, acks, state) = setup(&config).await;
        let addr = "127.0.0.1:9".parse().unwrap();
        peers.write().await.admit("2".to_string(), addr, vec![]);
        state.apply_remote_update("2", Coord::new(3, 3), 4).await;

        let id = acks
            .send_reliable("2", GameMessage::ScoreClaim { score: 1 })
            .await
            .unwrap();
        peers.write().await.get_mut("2").unwrap().missed_heartbeats = config.max_missed_heartbeats + 1;

        assert_eq!(pruner.tick(Instant::now()).await, vec!["2".to_string()]);
        assert!(!peers.read().await.contains("2"));
        assert!(!acks.is_outstanding(id).await);

        // No further retries for the pruned peer
        let report = acks.retry_due(Instant::now() + Duration::from_secs(10)).await;
        assert!(report.resent.is_empty());

        // Stale position stays on display
        assert_eq!(state.position_of("2").await, Some(Coord::new(3, 3)));
    }

    #[tokio::test]
    async fn test_prunes_idle_peer() {
        let config = GameConfig::default();
        let (pruner, peers, _, _) = setup(&config).await;
        let addr = "127.0.0.1:9".parse().unwrap();
        peers.write().await.admit("2".to_string(), addr, vec![]);

        assert!(pruner.tick(Instant::now()).await.is_empty());

        let later = Instant::now() + config.peer_timeout() + Duration::from_millis(1);
        assert_eq!(pruner.tick(later).await, vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn test_pruned_peer_comes_back_with_fresh_state() {
        let config = GameConfig::default();
        let (pruner, peers, acks, _) = setup(&config).await;
        let addr = "127.0.0.1:9".parse().unwrap();
        peers.write().await.admit("2".to_string(), addr, vec![]);
        peers.write().await.remember("2", 41);
        acks.send_chain("2", vec![GameMessage::Commit { commit_hash: [1; 32] }])
            .await
            .unwrap();
        acks.send_chain("2", vec![GameMessage::Commit { commit_hash: [2; 32] }])
            .await;

        let later = Instant::now() + config.peer_timeout() + Duration::from_millis(1);
        assert_eq!(pruner.tick(later).await, vec!["2".to_string()]);
        assert_eq!(acks.queued_chains("2").await, 0);

        peers.write().await.admit("2".to_string(), addr, vec![]);
        assert!(peers.read().await.get("2").unwrap().recent_ids.is_empty());
        assert!(peers.write().await.remember("2", 41));

        // A new chain is not stuck behind the abandoned one
        assert!(acks
            .send_chain("2", vec![GameMessage::Commit { commit_hash: [3; 32] }])
            .await
            .is_some());
    }
}
