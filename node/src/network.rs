use crate::acks::AckTracker;
use crate::identity::NodeIdentity;
use crate::peers::SharedPeerTable;
use crate::state::StateSynchronizer;
use crate::transport::Transport;
use crate::validator::MoveValidator;
use log::{debug, info, warn};
use shared::{GameMessage, Packet, PlayerId, TransportError, ValidationError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Receives peer traffic and routes each packet to the component that owns it.
pub struct PeerNetwork {
    transport: Transport,
    peers: SharedPeerTable,
    state: StateSynchronizer,
    validator: Arc<MoveValidator>,
    acks: Arc<AckTracker>,
    identity: NodeIdentity,
}

impl PeerNetwork {
    pub fn new(
        transport: Transport,
        peers: SharedPeerTable,
        state: StateSynchronizer,
        validator: Arc<MoveValidator>,
        acks: Arc<AckTracker>,
        identity: NodeIdentity,
    ) -> Self {
        Self {
            transport,
            peers,
            state,
            validator,
            acks,
            identity,
        }
    }

    pub async fn run_listener(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Listening for peers on {}", self.transport.local_addr());

        loop {
            tokio::select! {
                result = self.transport.recv() => match result {
                    Ok((packet, src)) => self.handle_packet(packet, src).await,
                    Err((TransportError::Io(e), _)) => warn!("Receive error: {}", e),
                    Err((e, src)) => warn!("Dropping malformed datagram from {:?}: {}", src, e),
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    pub async fn handle_packet(&self, packet: Packet, src: SocketAddr) {
        match packet {
            Packet::Discovery {
                return_addr,
                player_id,
                public_key,
            } => {
                self.on_discovery(return_addr, player_id, public_key).await;
            }
            Packet::Connected { player_id } => {
                if self.peers.write().await.mark_connected(&player_id) {
                    debug!("Handshake with {} complete", player_id);
                } else {
                    debug!("Connected from unknown peer {} at {}", player_id, src);
                }
            }
            Packet::StateSync { sender, coord, seq } => {
                if sender == self.identity.player_id {
                    return;
                }
                if self.peers.write().await.touch(&sender) {
                    if !self.state.apply_remote_update(&sender, coord, seq).await {
                        debug!("Ignoring stale state sync {} from {}", seq, sender);
                    }
                } else {
                    debug!("Ignoring state sync from unknown peer {}", sender);
                }
            }
            Packet::Reliable {
                message_id,
                sender,
                message,
                signature,
            } => {
                self.on_reliable(src, message_id, sender, message, signature).await;
            }
            Packet::Ack { message_id, sender } => {
                self.peers.write().await.touch(&sender);
                if !self.acks.on_ack(&sender, message_id).await {
                    debug!("Stale ack {} from {}", message_id, sender);
                }
            }
        }
    }

    async fn on_discovery(&self, return_addr: SocketAddr, player_id: PlayerId, public_key: Vec<u8>) {
        if player_id == self.identity.player_id {
            return;
        }

        {
            let mut peers = self.peers.write().await;
            let key_conflict = peers
                .public_key_of(&player_id)
                .is_some_and(|known| !known.is_empty() && known != public_key);
            if key_conflict {
                warn!("Discovery from {} with a mismatched public key, ignoring", player_id);
                return;
            }
            peers.admit(player_id.clone(), return_addr, public_key);
        }

        let connected = Packet::Connected {
            player_id: self.identity.player_id.clone(),
        };
        let (coord, seq) = self.state.local_state().await;
        let sync = Packet::StateSync {
            sender: self.identity.player_id.clone(),
            coord,
            seq,
        };
        for reply in [connected, sync] {
            if let Err(e) = self.transport.send(return_addr, &reply).await {
                warn!("Failed to answer discovery from {}: {}", player_id, e);
            }
        }
    }

    async fn on_reliable(
        &self,
        src: SocketAddr,
        message_id: u64,
        sender: PlayerId,
        message: GameMessage,
        signature: Vec<u8>,
    ) {
        let public_key = self.peers.read().await.public_key_of(&sender);
        let Some(public_key) = public_key else {
            debug!("Dropping message {} from unknown peer {}", message_id, sender);
            return;
        };
        if !self
            .identity
            .verify_reliable(&public_key, message_id, &sender, &message, &signature)
        {
            warn!("Bad signature on message {} from {}", message_id, sender);
            return;
        }
        let fresh = {
            let mut peers = self.peers.write().await;
            peers.touch(&sender);
            peers.remember(&sender, message_id)
        };

        if fresh {
            if let Err(e) = self.apply_game_message(&sender, message).await {
                warn!("Rejected message from {}: {}", sender, e);
            }
        } else {
            debug!("Duplicate message {} from {}", message_id, sender);
        }

        // Rejected and duplicate messages are acked too so the sender stops retrying
        let ack = Packet::Ack {
            message_id,
            sender: self.identity.player_id.clone(),
        };
        if let Err(e) = self.transport.send(src, &ack).await {
            warn!("Failed to ack message {} from {}: {}", message_id, sender, e);
        }
    }

    async fn apply_game_message(&self, sender: &str, message: GameMessage) -> Result<(), ValidationError> {
        match message {
            GameMessage::Commit { commit_hash } => {
                self.validator
                    .validate_commitment(sender, sender, commit_hash, Instant::now())
                    .await
            }
            GameMessage::Reveal {
                seq,
                from,
                destination,
                nonce,
            } => {
                let coord = self
                    .validator
                    .validate_reveal(sender, seq, from, destination, nonce)
                    .await?;
                if !self.state.apply_remote_update(sender, coord, seq).await {
                    debug!("Move {} of {} already superseded", seq, sender);
                }
                Ok(())
            }
            GameMessage::ScoreClaim { score } => {
                self.validator.validate_captured_prey(sender).await?;
                self.validator.validate_score_update(sender, score).await?;
                self.state.set_score(sender, score).await;
                info!("Player {} scored, now at {}", sender, score);
                Ok(())
            }
        }
    }

    /// Broadcasts the local position on a timer.
    pub async fn run_gossip(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.gossip().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    pub async fn gossip(&self) -> usize {
        let addrs: Vec<SocketAddr> = self
            .peers
            .read()
            .await
            .addrs()
            .into_iter()
            .map(|(_, addr)| addr)
            .collect();
        if addrs.is_empty() {
            return 0;
        }

        let (coord, seq) = self.state.local_state().await;
        let sync = Packet::StateSync {
            sender: self.identity.player_id.clone(),
            coord,
            seq,
        };
        self.transport.broadcast(&addrs, &sync).await
    }
}
