//! Wires every component of a player node together and drives the local player

use crate::acks::AckTracker;
use crate::identity::NodeIdentity;
use crate::membership::{Coordinator, MembershipClient, Registration};
use crate::network::PeerNetwork;
use crate::peers::{PeerTable, SharedPeerTable};
use crate::pruner::Pruner;
use crate::state::{GameStateReplica, LocalMove, StateSynchronizer};
use crate::transport::Transport;
use crate::validator::MoveValidator;
use log::{debug, info, warn};
use shared::{
    commit_hash, Coord, Crypto, Direction, GameConfig, GameMessage, GridManager, MembershipError, Packet,
    TransportError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),
}

#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// UDP address peers reach this node on
    pub listen_addr: String,
    /// How often `run` pushes a replica snapshot to the front-end
    pub render_interval: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            render_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Moved(Coord),
    Rejected(Coord),
    /// Every peer send failed so the move was rolled back
    Reverted(Coord),
    Quit,
    Ignored,
}

pub struct PlayerNode<C: Coordinator> {
    registration: Registration,
    transport: Transport,
    peers: SharedPeerTable,
    state: StateSynchronizer,
    validator: Arc<MoveValidator>,
    acks: Arc<AckTracker>,
    membership: Arc<MembershipClient<C>>,
    render_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: Coordinator> PlayerNode<C> {
    /// Binds, registers, discovers peers and spawns the background tasks.
    pub async fn start(settings: NodeSettings, coordinator: C, crypto: Arc<dyn Crypto>) -> Result<Self, NodeError> {
        let transport = Transport::bind(&settings.listen_addr).await?;
        let peers = PeerTable::shared();

        let membership = Arc::new(MembershipClient::new(
            coordinator,
            Arc::clone(&crypto),
            transport.clone(),
            Arc::clone(&peers),
        ));
        let registration = membership.register().await?;
        let config = registration.config.clone();

        let identity = NodeIdentity::new(registration.player_id.clone(), crypto);
        let state = StateSynchronizer::new(
            registration.player_id.clone(),
            config.initial_position,
            config.prey_position,
        );
        let validator = Arc::new(MoveValidator::new(
            Arc::new(GridManager::from_config(&config)),
            state.clone(),
            &config,
        ));
        let acks = Arc::new(AckTracker::new(
            transport.clone(),
            Arc::clone(&peers),
            identity.clone(),
            config.ack_timeout(),
            config.max_retries,
        ));
        let network = Arc::new(PeerNetwork::new(
            transport.clone(),
            Arc::clone(&peers),
            state.clone(),
            Arc::clone(&validator),
            Arc::clone(&acks),
            identity,
        ));
        let pruner = Arc::new(Pruner::new(
            Arc::clone(&peers),
            Arc::clone(&acks),
            Arc::clone(&validator),
            &config,
        ));

        if let Err(e) = membership.fetch_peers().await {
            warn!("Initial peer fetch failed: {}", e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        {
            let network = Arc::clone(&network);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { network.run_listener(shutdown).await }));
        }
        {
            let network = Arc::clone(&network);
            let shutdown = shutdown_rx.clone();
            let period = config.gossip_interval();
            tasks.push(tokio::spawn(async move { network.run_gossip(period, shutdown).await }));
        }
        {
            let membership = Arc::clone(&membership);
            let shutdown = shutdown_rx.clone();
            let period = config.heartbeat_interval();
            tasks.push(tokio::spawn(async move { membership.run_heartbeat(period, shutdown).await }));
        }
        {
            let membership = Arc::clone(&membership);
            let shutdown = shutdown_rx.clone();
            let period = config.peer_refresh_interval();
            tasks.push(tokio::spawn(async move { membership.run_peer_refresh(period, shutdown).await }));
        }
        {
            let acks = Arc::clone(&acks);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { acks.run(shutdown).await }));
        }
        {
            let pruner = Arc::clone(&pruner);
            let shutdown = shutdown_rx;
            tasks.push(tokio::spawn(async move { pruner.run(shutdown).await }));
        }

        info!(
            "Player {} up on {} at {}",
            registration.player_id,
            transport.local_addr(),
            config.initial_position
        );

        Ok(Self {
            registration,
            transport,
            peers,
            state,
            validator,
            acks,
            membership,
            render_interval: settings.render_interval,
            shutdown_tx,
            tasks,
        })
    }

    pub fn player_id(&self) -> &str {
        &self.registration.player_id
    }

    pub fn config(&self) -> &GameConfig {
        &self.registration.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn state(&self) -> &StateSynchronizer {
        &self.state
    }

    pub fn peers(&self) -> &SharedPeerTable {
        &self.peers
    }

    pub fn membership(&self) -> &MembershipClient<C> {
        &self.membership
    }

    /// Reliable messages still waiting for an ack.
    pub async fn outstanding_messages(&self) -> usize {
        self.acks.outstanding_count().await
    }

    /// Interprets one line of player input.
    pub async fn handle_command(&self, command: &str) -> CommandOutcome {
        let command = command.trim().to_lowercase();
        if command == "quit" || command == "exit" {
            return CommandOutcome::Quit;
        }

        match command.parse::<Direction>() {
            Ok(direction) => self.move_local(direction).await,
            Err(_) => {
                warn!("Unknown command {:?}", command);
                CommandOutcome::Ignored
            }
        }
    }

    async fn move_local(&self, direction: Direction) -> CommandOutcome {
        let (candidate, accepted) = self.validator.validate_local_move(direction).await;
        if !accepted {
            info!("Move {:?} to {} rejected", direction, candidate);
            return CommandOutcome::Rejected(candidate);
        }

        let LocalMove { previous, seq } = self.state.apply_local_move(candidate).await;
        let peers = self.peers.read().await.addrs();
        let addrs: Vec<SocketAddr> = peers.iter().map(|(_, addr)| *addr).collect();

        let sync = Packet::StateSync {
            sender: self.registration.player_id.clone(),
            coord: candidate,
            seq,
        };
        let delivered = self.transport.broadcast(&addrs, &sync).await;
        if !addrs.is_empty() && delivered == 0 {
            warn!("No peer reachable, reverting move to {}", previous);
            self.state.apply_local_move(previous).await;
            return CommandOutcome::Reverted(candidate);
        }

        let nonce: u64 = rand::random();
        let mut messages = vec![
            GameMessage::Commit {
                commit_hash: commit_hash(candidate, nonce),
            },
            GameMessage::Reveal {
                seq,
                from: previous,
                destination: candidate,
                nonce,
            },
        ];

        if candidate == self.registration.config.prey_position {
            let score = self.state.score_of(&self.registration.player_id).await + 1;
            self.state.set_score(&self.registration.player_id, score).await;
            info!("Captured the prey, score {}", score);
            messages.push(GameMessage::ScoreClaim { score });
        }

        // Queued behind any earlier move still in flight to the same peer
        for (peer_id, _) in &peers {
            self.acks.send_chain(peer_id, messages.clone()).await;
        }

        debug!("Moved {} -> {}", previous, candidate);
        CommandOutcome::Moved(candidate)
    }

    /// Feeds player input and pushes snapshots until quit or shutdown.
    pub async fn run(&self, mut input_rx: mpsc::Receiver<String>, snapshot_tx: mpsc::Sender<GameStateReplica>) {
        let mut render = tokio::time::interval(self.render_interval);
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                line = input_rx.recv() => match line {
                    Some(line) => {
                        if self.handle_command(&line).await == CommandOutcome::Quit {
                            info!("Quit requested");
                            break;
                        }
                    }
                    None => break,
                },
                _ = render.tick() => {
                    if snapshot_tx.try_send(self.state.snapshot().await).is_err() {
                        debug!("Front-end is behind, skipping snapshot");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.shutdown();
    }

    /// Signals every background task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the node and waits for its tasks.
    pub async fn stop(self) {
        self.shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
    }
}
