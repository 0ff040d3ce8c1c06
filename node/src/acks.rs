//! Best-effort reliability for game messages over UDP
//!
//! Moves, commitments and score claims must not silently vanish, so they go
//! out as `Packet::Reliable` and stay in the outstanding table until the peer
//! acks them. Unacked messages are resent with the same id and payload,
//! oldest first, until they run out of retries; a dropped message counts as a
//! missed heartbeat against its destination, which feeds the pruner.
//!
//! A message can carry follow-ups that are only sent once it is acked. The
//! orchestrator uses this to keep commit, reveal and score claim in order
//! per peer. Such chains also run one at a time per peer: a chain started
//! while another one to the same peer is in flight waits until the earlier
//! one is fully acked or dropped.

use crate::identity::NodeIdentity;
use crate::peers::SharedPeerTable;
use crate::transport::Transport;
use log::{debug, info, warn};
use shared::{GameMessage, Packet, PlayerId};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone)]
pub struct OutstandingMessage {
    pub message_id: u64,
    pub destination: PlayerId,
    pub addr: SocketAddr,
    pub packet: Packet,
    pub sent_at: Instant,
    pub retry_count: u32,
    pub follow_ups: VecDeque<GameMessage>,
    /// Part of a chain started with `send_chain`
    pub chained: bool,
}

/// What one retry pass did
#[derive(Debug, Default, PartialEq)]
pub struct RetryReport {
    pub resent: Vec<u64>,
    pub dropped: Vec<(u64, PlayerId)>,
}

pub struct AckTracker {
    transport: Transport,
    peers: SharedPeerTable,
    identity: NodeIdentity,
    ack_timeout: Duration,
    max_retries: u32,
    next_message_id: AtomicU64,
    outstanding: Mutex<HashMap<u64, OutstandingMessage>>,
    // A key is present while a chain to that peer is in flight
    waiting_chains: Mutex<HashMap<PlayerId, VecDeque<VecDeque<GameMessage>>>>,
}

impl AckTracker {
    pub fn new(
        transport: Transport,
        peers: SharedPeerTable,
        identity: NodeIdentity,
        ack_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            transport,
            peers,
            identity,
            ack_timeout,
            max_retries,
            next_message_id: AtomicU64::new(1),
            outstanding: Mutex::new(HashMap::new()),
            waiting_chains: Mutex::new(HashMap::new()),
        }
    }

    /// Sends one message on its own, independent of any chain.
    pub async fn send_reliable(&self, peer_id: &str, message: GameMessage) -> Option<u64> {
        let addr = self.peers.read().await.addr_of(peer_id);
        let Some(addr) = addr else {
            debug!("Not sending to unknown peer {}", peer_id);
            return None;
        };

        self.dispatch(peer_id, addr, message, VecDeque::new(), false).await
    }

    /// Sends the first message now and each following one after the previous is acked.
    ///
    /// Returns the id of the first message, or `None` when the peer is
    /// unknown or the chain was queued behind one already in flight.
    pub async fn send_chain(&self, peer_id: &str, messages: Vec<GameMessage>) -> Option<u64> {
        let mut queue: VecDeque<GameMessage> = messages.into();
        let first = queue.pop_front()?;

        let addr = self.peers.read().await.addr_of(peer_id);
        let Some(addr) = addr else {
            debug!("Not sending to unknown peer {}", peer_id);
            return None;
        };

        {
            let mut waiting_chains = self.waiting_chains.lock().await;
            if let Some(waiting) = waiting_chains.get_mut(peer_id) {
                queue.push_front(first);
                waiting.push_back(queue);
                debug!("Chain to {} queued, {} waiting", peer_id, waiting.len());
                return None;
            }
            waiting_chains.insert(peer_id.to_string(), VecDeque::new());
        }

        match self.dispatch(peer_id, addr, first, queue, true).await {
            Some(message_id) => Some(message_id),
            None => {
                self.start_next_chain(peer_id).await;
                None
            }
        }
    }

    /// Starts the next queued chain to `peer_id` once the previous one ended.
    async fn start_next_chain(&self, peer_id: &str) {
        let addr = self.peers.read().await.addr_of(peer_id);

        loop {
            let next = {
                let mut waiting_chains = self.waiting_chains.lock().await;
                let next = match (addr, waiting_chains.get_mut(peer_id)) {
                    (Some(_), Some(waiting)) => waiting.pop_front(),
                    _ => None,
                };
                if next.is_none() {
                    waiting_chains.remove(peer_id);
                }
                next
            };

            let (Some(addr), Some(mut chain)) = (addr, next) else {
                return;
            };
            let Some(first) = chain.pop_front() else {
                continue;
            };
            if self.dispatch(peer_id, addr, first, chain, true).await.is_some() {
                return;
            }
        }
    }

    async fn dispatch(
        &self,
        peer_id: &str,
        addr: SocketAddr,
        message: GameMessage,
        follow_ups: VecDeque<GameMessage>,
        chained: bool,
    ) -> Option<u64> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let packet = match self.identity.reliable_packet(message_id, message) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Failed to build reliable packet for {}: {}", peer_id, e);
                return None;
            }
        };

        self.outstanding.lock().await.insert(
            message_id,
            OutstandingMessage {
                message_id,
                destination: peer_id.to_string(),
                addr,
                packet: packet.clone(),
                sent_at: Instant::now(),
                retry_count: 0,
                follow_ups,
                chained,
            },
        );
        self.peers.write().await.track_outstanding(peer_id, message_id);

        if let Err(e) = self.transport.send(addr, &packet).await {
            warn!("Send of message {} to {} failed, will retry: {}", message_id, peer_id, e);
        }
        Some(message_id)
    }

    /// Settles an outstanding message. Late or duplicate acks are ignored.
    pub async fn on_ack(&self, peer_id: &str, message_id: u64) -> bool {
        let settled = {
            let mut outstanding = self.outstanding.lock().await;
            match outstanding.get(&message_id) {
                Some(entry) if entry.destination == peer_id => outstanding.remove(&message_id),
                _ => None,
            }
        };

        let Some(mut entry) = settled else {
            return false;
        };
        self.peers.write().await.clear_outstanding(peer_id, message_id);

        match entry.follow_ups.pop_front() {
            Some(next) => {
                let dispatched = self
                    .dispatch(peer_id, entry.addr, next, entry.follow_ups, entry.chained)
                    .await;
                if dispatched.is_none() && entry.chained {
                    self.start_next_chain(peer_id).await;
                }
            }
            None if entry.chained => self.start_next_chain(peer_id).await,
            None => {}
        }
        true
    }

    /// Resends every message whose ack is overdue, oldest first, and drops
    /// those that already used up their retries. Dropping a chained message
    /// drops the rest of its chain too.
    pub async fn retry_due(&self, now: Instant) -> RetryReport {
        let mut report = RetryReport::default();
        let mut resends = Vec::new();
        let mut broken_chains = Vec::new();

        {
            let mut outstanding = self.outstanding.lock().await;
            let mut due: Vec<(Instant, u64)> = outstanding
                .values()
                .filter(|entry| now.saturating_duration_since(entry.sent_at) >= self.ack_timeout)
                .map(|entry| (entry.sent_at, entry.message_id))
                .collect();
            due.sort();

            for (_, message_id) in due {
                let exhausted = match outstanding.get(&message_id) {
                    Some(entry) => entry.retry_count >= self.max_retries,
                    None => continue,
                };

                if exhausted {
                    if let Some(entry) = outstanding.remove(&message_id) {
                        if entry.chained {
                            broken_chains.push(entry.destination.clone());
                        }
                        report.dropped.push((message_id, entry.destination));
                    }
                } else if let Some(entry) = outstanding.get_mut(&message_id) {
                    entry.retry_count += 1;
                    entry.sent_at = now;
                    resends.push((entry.addr, entry.packet.clone()));
                    report.resent.push(message_id);
                }
            }
        }

        if !report.dropped.is_empty() {
            let mut peers = self.peers.write().await;
            for (message_id, destination) in &report.dropped {
                info!("Message {} to {} dropped after {} retries", message_id, destination, self.max_retries);
                peers.record_missed(destination, *message_id);
            }
        }

        for (addr, packet) in resends {
            if let Err(e) = self.transport.send(addr, &packet).await {
                warn!("Retry to {} failed: {}", addr, e);
            }
        }

        for peer_id in broken_chains {
            self.start_next_chain(&peer_id).await;
        }

        report
    }

    /// Forgets every message and queued chain bound for a pruned peer.
    pub async fn abandon_peer(&self, peer_id: &str) -> usize {
        self.waiting_chains.lock().await.remove(peer_id);
        let mut outstanding = self.outstanding.lock().await;
        let before = outstanding.len();
        outstanding.retain(|_, entry| entry.destination != peer_id);
        before - outstanding.len()
    }

    pub async fn outstanding_count(&self) -> usize {
        self.outstanding.lock().await.len()
    }

    pub async fn is_outstanding(&self, message_id: u64) -> bool {
        self.outstanding.lock().await.contains_key(&message_id)
    }

    /// Chains to `peer_id` waiting behind the one in flight.
    pub async fn queued_chains(&self, peer_id: &str) -> usize {
        self.waiting_chains
            .lock()
            .await
            .get(peer_id)
            .map_or(0, |waiting| waiting.len())
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = (self.ack_timeout / 2).max(Duration::from_millis(10));
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.retry_due(Instant::now()).await;
                    if !report.resent.is_empty() {
                        debug!("Resent {} reliable messages", report.resent.len());
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
