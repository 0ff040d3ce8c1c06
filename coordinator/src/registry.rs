//! Registered node bookkeeping for the coordination server
//!
//! This module tracks which nodes are currently part of the game:
//! - Registration with duplicate key and duplicate address rejection
//! - Stable player id assignment per public key across re-registrations
//! - Heartbeat-driven liveness and timeout cleanup
//! - Roster queries used by nodes to discover each other
//!
//! The registry never talks to the network itself; the RPC layer in
//! `network` owns the sockets and calls into it under a lock.

use log::info;
use shared::crypto::encode_public_key;
use shared::{PeerInfo, PlayerId, RpcError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A node the coordinator currently considers alive
#[derive(Debug)]
pub struct RegisteredNode {
    /// Id handed back at registration
    pub player_id: PlayerId,
    /// UDP address other nodes should flood
    pub addr: SocketAddr,
    /// Raw public key bytes
    pub public_key: Vec<u8>,
    /// Last registration or heartbeat
    pub last_seen: Instant,
}

impl RegisteredNode {
    pub fn new(player_id: PlayerId, addr: SocketAddr, public_key: Vec<u8>) -> Self {
        Self {
            player_id,
            addr,
            public_key,
            last_seen: Instant::now(),
        }
    }

    /// Returns true if no heartbeat arrived within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    fn info(&self) -> PeerInfo {
        PeerInfo {
            player_id: self.player_id.clone(),
            addr: self.addr,
            public_key: self.public_key.clone(),
        }
    }
}

/// Roster of registered nodes keyed by encoded public key
///
/// Ids are derived once per key and remembered even after the node times
/// out, so a node that re-registers keeps the identity its peers know it by.
pub struct Registry {
    /// Live nodes indexed by hex-encoded public key
    nodes: HashMap<String, RegisteredNode>,
    /// Every id ever assigned, by hex-encoded public key
    assigned_ids: HashMap<String, PlayerId>,
    /// Next numeric id for an unseen key
    next_player_id: u32,
    /// Silence after which a node is dropped from the roster
    node_timeout: Duration,
}

impl Registry {
    pub fn new(node_timeout: Duration) -> Self {
        Self {
            nodes: HashMap::new(),
            assigned_ids: HashMap::new(),
            next_player_id: 1,
            node_timeout,
        }
    }

    /// Registers a node, rejecting duplicate keys and addresses
    pub fn register(&mut self, addr: SocketAddr, public_key: Vec<u8>) -> Result<PlayerId, RpcError> {
        let key = encode_public_key(&public_key);

        if self.nodes.contains_key(&key) {
            return Err(RpcError::KeyAlreadyRegistered(key));
        }
        if self.nodes.values().any(|node| node.addr == addr) {
            return Err(RpcError::AddressAlreadyRegistered(addr.to_string()));
        }

        let player_id = match self.assigned_ids.get(&key) {
            Some(id) => id.clone(),
            None => {
                let id = self.next_player_id.to_string();
                self.next_player_id += 1;
                self.assigned_ids.insert(key.clone(), id.clone());
                id
            }
        };

        info!("Node {} registered from {}", player_id, addr);
        self.nodes
            .insert(key, RegisteredNode::new(player_id.clone(), addr, public_key));
        Ok(player_id)
    }

    /// Refreshes a node's liveness
    pub fn heartbeat(&mut self, public_key: &[u8]) -> Result<(), RpcError> {
        let key = encode_public_key(public_key);
        match self.nodes.get_mut(&key) {
            Some(node) => {
                node.last_seen = Instant::now();
                Ok(())
            }
            None => Err(RpcError::UnknownKey(key)),
        }
    }

    /// Lists every live node except the caller
    pub fn get_nodes(&self, public_key: &[u8]) -> Result<Vec<PeerInfo>, RpcError> {
        let key = encode_public_key(public_key);
        if !self.nodes.contains_key(&key) {
            return Err(RpcError::UnknownKey(key));
        }

        Ok(self
            .nodes
            .iter()
            .filter(|(other, _)| **other != key)
            .map(|(_, node)| node.info())
            .collect())
    }

    /// Removes nodes whose heartbeats stopped and returns their ids
    pub fn check_timeouts(&mut self) -> Vec<PlayerId> {
        let timeout = self.node_timeout;
        let expired: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.is_timed_out(timeout))
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.nodes.remove(&key))
            .map(|node| {
                info!("Node {} timed out", node.player_id);
                node.player_id
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[cfg(test)]
    fn node_mut(&mut self, public_key: &[u8]) -> Option<&mut RegisteredNode> {
        self.nodes.get_mut(&encode_public_key(public_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut registry = Registry::new(Duration::from_secs(5));

        let id1 = registry.register(test_addr(), vec![1; 32]).unwrap();
        let id2 = registry.register(test_addr2(), vec![2; 32]).unwrap();

        assert_eq!(id1, "1");
        assert_eq!(id2, "2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut registry = Registry::new(Duration::from_secs(5));
        registry.register(test_addr(), vec![1; 32]).unwrap();

        let result = registry.register(test_addr2(), vec![1; 32]);
        assert!(matches!(result, Err(RpcError::KeyAlreadyRegistered(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut registry = Registry::new(Duration::from_secs(5));
        registry.register(test_addr(), vec![1; 32]).unwrap();

        let result = registry.register(test_addr(), vec![2; 32]);
        assert!(matches!(result, Err(RpcError::AddressAlreadyRegistered(_))));
    }

    #[test]
    fn test_get_nodes_excludes_caller() {
        let mut registry = Registry::new(Duration::from_secs(5));
        registry.register(test_addr(), vec![1; 32]).unwrap();
        registry.register(test_addr2(), vec![2; 32]).unwrap();

        let nodes = registry.get_nodes(&[1; 32]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].player_id, "2");
        assert_eq!(nodes[0].addr, test_addr2());
    }

    #[test]
    fn test_unknown_key() {
        let mut registry = Registry::new(Duration::from_secs(5));
        assert!(matches!(registry.heartbeat(&[9; 32]), Err(RpcError::UnknownKey(_))));
        assert!(matches!(registry.get_nodes(&[9; 32]), Err(RpcError::UnknownKey(_))));
    }

    #[test]
    fn test_timeout_and_reregistration_keeps_id() {
        let mut registry = Registry::new(Duration::from_secs(1));
        let id = registry.register(test_addr(), vec![1; 32]).unwrap();

        assert!(registry.check_timeouts().is_empty());

        registry.node_mut(&[1; 32]).unwrap().last_seen = Instant::now() - Duration::from_secs(2);
        assert_eq!(registry.check_timeouts(), vec![id.clone()]);
        assert!(registry.is_empty());

        let again = registry.register(test_addr(), vec![1; 32]).unwrap();
        assert_eq!(again, id);
    }

    #[test]
    fn test_heartbeat_refreshes_liveness() {
        let mut registry = Registry::new(Duration::from_secs(1));
        registry.register(test_addr(), vec![1; 32]).unwrap();

        registry.node_mut(&[1; 32]).unwrap().last_seen = Instant::now() - Duration::from_secs(2);
        registry.heartbeat(&[1; 32]).unwrap();

        assert!(registry.check_timeouts().is_empty());
        assert_eq!(registry.len(), 1);
    }
}
