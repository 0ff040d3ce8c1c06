//! Known peers and their liveness bookkeeping
//!
//! The peer table is one of the two long-lived shared structures in a node.
//! The transport refreshes records on receipt and filters duplicate reliable
//! messages against them, the acknowledgement tracker
//! attaches outstanding message ids and counts missed acknowledgements, the
//! membership client reconciles it against the coordinator roster, and the
//! pruner evicts silent peers.

use log::info;
use shared::{PeerInfo, PlayerId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub type SharedPeerTable = Arc<RwLock<PeerTable>>;

/// How many recent reliable ids are remembered per peer for duplicate detection
pub const RECENT_IDS_PER_PEER: usize = 64;

/// One remote node this node exchanges datagrams with
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PlayerId,
    pub addr: SocketAddr,
    pub public_key: Vec<u8>,
    /// Last time any packet arrived from this peer
    pub last_seen: Instant,
    /// Reliable message ids still waiting for an ack
    pub outstanding_acks: HashSet<u64>,
    /// Reliable messages dropped after exhausting their retries
    pub missed_heartbeats: u32,
    /// Set once the peer has answered our discovery handshake
    pub connected: bool,
    /// Reliable ids already applied from this peer, oldest first
    pub recent_ids: VecDeque<u64>,
}

impl PeerRecord {
    pub fn new(id: PlayerId, addr: SocketAddr, public_key: Vec<u8>) -> Self {
        Self {
            id,
            addr,
            public_key,
            last_seen: Instant::now(),
            outstanding_acks: HashSet::new(),
            missed_heartbeats: 0,
            connected: false,
            recent_ids: VecDeque::new(),
        }
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

impl From<PeerInfo> for PeerRecord {
    fn from(info: PeerInfo) -> Self {
        PeerRecord::new(info.player_id, info.addr, info.public_key)
    }
}

/// Active peers plus tombstones for peers this node pruned itself
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PlayerId, PeerRecord>,
    pruned: HashSet<PlayerId>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedPeerTable {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Adds a peer that introduced itself directly.
    ///
    /// Returns true when the peer was not known before. Direct contact clears
    /// any tombstone.
    pub fn admit(&mut self, id: PlayerId, addr: SocketAddr, public_key: Vec<u8>) -> bool {
        self.pruned.remove(&id);
        match self.peers.get_mut(&id) {
            Some(record) => {
                record.addr = addr;
                record.public_key = public_key;
                record.last_seen = Instant::now();
                false
            }
            None => {
                info!("Peer {} joined from {}", id, addr);
                self.peers.insert(id.clone(), PeerRecord::new(id, addr, public_key));
                true
            }
        }
    }

    /// Replaces the peer set with the coordinator's roster.
    ///
    /// Peers missing from the roster are dropped. Tombstoned peers the roster
    /// still lists stay out; tombstones for peers the roster no longer lists
    /// are cleared so a later re-registration brings them back. Returns the
    /// newly learned records.
    pub fn reconcile_roster(&mut self, local_id: &str, roster: Vec<PeerInfo>) -> Vec<PeerRecord> {
        let roster: Vec<PeerInfo> = roster.into_iter().filter(|info| info.player_id != local_id).collect();
        let listed: HashSet<PlayerId> = roster.iter().map(|info| info.player_id.clone()).collect();

        self.pruned.retain(|id| listed.contains(id));
        self.peers.retain(|id, _| listed.contains(id));

        let mut learned = Vec::new();
        for info in roster {
            if self.pruned.contains(&info.player_id) {
                continue;
            }
            match self.peers.get_mut(&info.player_id) {
                Some(record) => {
                    record.addr = info.addr;
                    record.public_key = info.public_key;
                }
                None => {
                    let record = PeerRecord::from(info);
                    self.peers.insert(record.id.clone(), record.clone());
                    learned.push(record);
                }
            }
        }
        learned
    }

    /// Refreshes `last_seen` for a peer; returns false for unknown ids.
    pub fn touch(&mut self, id: &str) -> bool {
        match self.peers.get_mut(id) {
            Some(record) => {
                record.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn mark_connected(&mut self, id: &str) -> bool {
        match self.peers.get_mut(id) {
            Some(record) => {
                record.connected = true;
                record.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Records a reliable id received from `id`.
    ///
    /// Returns false when it was already seen or the peer is unknown. The
    /// window goes away with the record when the peer is pruned.
    pub fn remember(&mut self, id: &str, message_id: u64) -> bool {
        let Some(record) = self.peers.get_mut(id) else {
            return false;
        };
        if record.recent_ids.contains(&message_id) {
            return false;
        }
        if record.recent_ids.len() == RECENT_IDS_PER_PEER {
            record.recent_ids.pop_front();
        }
        record.recent_ids.push_back(message_id);
        true
    }

    pub fn track_outstanding(&mut self, id: &str, message_id: u64) {
        if let Some(record) = self.peers.get_mut(id) {
            record.outstanding_acks.insert(message_id);
        }
    }

    /// Settles an acked message; an ack resets the missed counter.
    pub fn clear_outstanding(&mut self, id: &str, message_id: u64) {
        if let Some(record) = self.peers.get_mut(id) {
            record.outstanding_acks.remove(&message_id);
            record.missed_heartbeats = 0;
        }
    }

    /// Records a reliable message to `id` that was dropped unacknowledged.
    pub fn record_missed(&mut self, id: &str, message_id: u64) {
        if let Some(record) = self.peers.get_mut(id) {
            record.outstanding_acks.remove(&message_id);
            record.missed_heartbeats += 1;
        }
    }

    /// Removes and tombstones every peer that is idle past `timeout` or has
    /// more than `max_missed` dropped messages.
    pub fn prune(&mut self, now: Instant, timeout: Duration, max_missed: u32) -> Vec<PeerRecord> {
        let stale: Vec<PlayerId> = self
            .peers
            .values()
            .filter(|record| record.is_idle(now, timeout) || record.missed_heartbeats > max_missed)
            .map(|record| record.id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.peers.remove(&id))
            .map(|record| {
                self.pruned.insert(record.id.clone());
                record
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PeerRecord> {
        self.peers.get_mut(id)
    }

    pub fn addr_of(&self, id: &str) -> Option<SocketAddr> {
        self.peers.get(id).map(|record| record.addr)
    }

    pub fn public_key_of(&self, id: &str) -> Option<Vec<u8>> {
        self.peers.get(id).map(|record| record.public_key.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn is_pruned(&self, id: &str) -> bool {
        self.pruned.contains(id)
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.peers.keys().cloned().collect()
    }

    pub fn addrs(&self) -> Vec<(PlayerId, SocketAddr)> {
        self.peers
            .values()
            .map(|record| (record.id.clone(), record.addr))
            .collect()
    }

    pub fn records(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
