use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub mod commitment;
pub mod crypto;
pub mod error;
pub mod geometry;
pub mod rpc;

pub use commitment::commit_hash;
pub use crypto::{Crypto, Ed25519Crypto};
pub use error::{MembershipError, RpcError, TransportError, ValidationError};
pub use geometry::{Geometry, GridManager};

/// Largest datagram any node will put on the wire.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Identifier assigned to a node by the coordinator.
pub type PlayerId = String;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the neighbouring cell one unit step away.
    pub fn step(&self, direction: Direction) -> Coord {
        match direction {
            Direction::Up => Coord::new(self.x, self.y + 1),
            Direction::Down => Coord::new(self.x, self.y - 1),
            Direction::Left => Coord::new(self.x - 1, self.y),
            Direction::Right => Coord::new(self.x + 1, self.y),
        }
    }

    pub fn manhattan_distance(&self, other: &Coord) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Immutable game settings handed out by the coordinator at registration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GameConfig {
    pub width: i32,
    pub height: i32,
    pub walls: Vec<Coord>,
    pub initial_position: Coord,
    pub prey_position: Coord,
    pub heartbeat_interval_ms: u64,
    pub peer_refresh_interval_ms: u64,
    pub gossip_interval_ms: u64,
    pub ack_timeout_ms: u64,
    pub max_retries: u32,
    pub prune_interval_ms: u64,
    pub peer_timeout_ms: u64,
    pub max_missed_heartbeats: u32,
    pub commit_timeout_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: 10,
            height: 10,
            walls: Vec::new(),
            initial_position: Coord::new(1, 1),
            prey_position: Coord::new(5, 5),
            heartbeat_interval_ms: 1000,
            peer_refresh_interval_ms: 2000,
            gossip_interval_ms: 500,
            ack_timeout_ms: 300,
            max_retries: 3,
            prune_interval_ms: 1000,
            peer_timeout_ms: 5000,
            max_missed_heartbeats: 3,
            commit_timeout_ms: 5000,
        }
    }
}

impl GameConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn peer_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.peer_refresh_interval_ms)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

/// Game messages that must survive packet loss; carried inside `Packet::Reliable`.
///
/// `seq` is the sender's move counter: its first move is 1 and every accepted
/// local move increments it. A reveal names the cell the move starts from so
/// it can be checked even when later moves already reached the receiver.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum GameMessage {
    Commit {
        commit_hash: [u8; 32],
    },
    Reveal {
        seq: u64,
        from: Coord,
        destination: Coord,
        nonce: u64,
    },
    ScoreClaim {
        score: u32,
    },
}

// Node-to-node datagrams
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Discovery {
        return_addr: SocketAddr,
        player_id: PlayerId,
        public_key: Vec<u8>,
    },
    Connected {
        player_id: PlayerId,
    },
    StateSync {
        sender: PlayerId,
        coord: Coord,
        /// Move counter of `sender` when it stood on `coord`
        seq: u64,
    },
    Reliable {
        message_id: u64,
        sender: PlayerId,
        message: GameMessage,
        signature: Vec<u8>,
    },
    Ack {
        message_id: u64,
        sender: PlayerId,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let data = bincode::serialize(self).map_err(|e| TransportError::Encode(e.to_string()))?;
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::Oversized(data.len()));
        }
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Self, TransportError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::Oversized(data.len()));
        }
        bincode::deserialize(data).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Bytes covered by the signature of a `Packet::Reliable`.
pub fn reliable_signing_bytes(
    message_id: u64,
    sender: &str,
    message: &GameMessage,
) -> Result<Vec<u8>, TransportError> {
    bincode::serialize(&(message_id, sender, message)).map_err(|e| TransportError::Encode(e.to_string()))
}

/// A registered node as reported by the coordinator.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PeerInfo {
    pub player_id: PlayerId,
    pub addr: SocketAddr,
    pub public_key: Vec<u8>,
}

// Node-to-coordinator requests
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerRequest {
    Register { addr: SocketAddr, public_key: Vec<u8> },
    GetNodes { public_key: Vec<u8> },
    Heartbeat { public_key: Vec<u8> },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerResponse {
    Registered { player_id: PlayerId, config: GameConfig },
    Nodes(Vec<PeerInfo>),
    HeartbeatAck,
    Error(RpcError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_coord_steps_change_one_axis() {
        let origin = Coord::new(3, 3);
        for direction in [Direction::Up, Direction::Down, Direction::Left, Direction::Right] {
            let next = origin.step(direction);
            assert_eq!(origin.manhattan_distance(&next), 1);
            assert!(next.x == origin.x || next.y == origin.y);
        }
        assert_eq!(origin.step(Direction::Up), Coord::new(3, 4));
        assert_eq!(origin.step(Direction::Down), Coord::new(3, 2));
        assert_eq!(origin.step(Direction::Left), Coord::new(2, 3));
        assert_eq!(origin.step(Direction::Right), Coord::new(4, 3));
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("up".parse::<Direction>(), Ok(Direction::Up));
        assert_eq!("right".parse::<Direction>(), Ok(Direction::Right));
        assert!("quit".parse::<Direction>().is_err());
        assert!("UP".parse::<Direction>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = GameConfig::default();
        assert_eq!(config.width, 10);
        assert_eq!(config.height, 10);
        assert_eq!(config.initial_position, Coord::new(1, 1));
        assert_eq!(config.prey_position, Coord::new(5, 5));
        assert_eq!(config.ack_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn test_packet_serialization_state_sync() {
        let packet = Packet::StateSync {
            sender: "7".to_string(),
            coord: Coord::new(2, 1),
            seq: 12,
        };
        let encoded = packet.encode().unwrap();
        assert!(encoded.len() <= MAX_DATAGRAM_SIZE);

        match Packet::decode(&encoded).unwrap() {
            Packet::StateSync { sender, coord, seq } => {
                assert_eq!(sender, "7");
                assert_eq!(coord, Coord::new(2, 1));
                assert_eq!(seq, 12);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_discovery() {
        let packet = Packet::Discovery {
            return_addr: test_addr(),
            player_id: "1".to_string(),
            public_key: vec![7; 32],
        };
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let packet = Packet::Discovery {
            return_addr: test_addr(),
            player_id: "x".repeat(MAX_DATAGRAM_SIZE),
            public_key: Vec::new(),
        };
        assert!(matches!(packet.encode(), Err(TransportError::Oversized(_))));
    }

    #[test]
    fn test_malformed_packet_rejected() {
        let valid = Packet::Connected {
            player_id: "3".to_string(),
        }
        .encode()
        .unwrap();

        assert!(Packet::decode(&[]).is_err());
        assert!(Packet::decode(&valid[..valid.len() / 2]).is_err());
        assert!(Packet::decode(b"connected").is_err());

        let mut corrupted = valid.clone();
        corrupted[0] = 0xFF;
        assert!(Packet::decode(&corrupted).is_err());
    }

    #[test]
    fn test_reveal_fits_in_one_datagram() {
        let reliable = Packet::Reliable {
            message_id: u64::MAX,
            sender: "123456".to_string(),
            message: GameMessage::Reveal {
                seq: u64::MAX,
                from: Coord::new(i32::MIN, i32::MIN),
                destination: Coord::new(i32::MAX, i32::MAX),
                nonce: u64::MAX,
            },
            signature: vec![0; 64],
        };
        assert!(reliable.encode().is_ok());
    }

    #[test]
    fn test_signing_bytes_cover_every_field() {
        let message = GameMessage::ScoreClaim { score: 1 };
        let base = reliable_signing_bytes(1, "a", &message).unwrap();
        assert_ne!(base, reliable_signing_bytes(2, "a", &message).unwrap());
        assert_ne!(base, reliable_signing_bytes(1, "b", &message).unwrap());
        assert_ne!(
            base,
            reliable_signing_bytes(1, "a", &GameMessage::ScoreClaim { score: 2 }).unwrap()
        );
    }
}
