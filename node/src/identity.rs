use shared::{reliable_signing_bytes, Crypto, GameMessage, Packet, PlayerId, TransportError};
use std::sync::Arc;

/// Who this node is for the lifetime of the process.
#[derive(Clone)]
pub struct NodeIdentity {
    pub player_id: PlayerId,
    crypto: Arc<dyn Crypto>,
}

impl NodeIdentity {
    pub fn new(player_id: PlayerId, crypto: Arc<dyn Crypto>) -> Self {
        Self { player_id, crypto }
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.crypto.public_key()
    }

    /// Wraps `message` in a signed reliable envelope from this node.
    pub fn reliable_packet(&self, message_id: u64, message: GameMessage) -> Result<Packet, TransportError> {
        let bytes = reliable_signing_bytes(message_id, &self.player_id, &message)?;
        Ok(Packet::Reliable {
            message_id,
            sender: self.player_id.clone(),
            signature: self.crypto.sign(&bytes),
            message,
        })
    }

    /// Checks a peer's reliable envelope against the key the coordinator gave us.
    pub fn verify_reliable(
        &self,
        public_key: &[u8],
        message_id: u64,
        sender: &str,
        message: &GameMessage,
        signature: &[u8],
    ) -> bool {
        match reliable_signing_bytes(message_id, sender, message) {
            Ok(bytes) => self.crypto.verify(public_key, &bytes, signature),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Ed25519Crypto;

    #[test]
    fn test_reliable_packet_verifies() {
        let alice = NodeIdentity::new("1".to_string(), Arc::new(Ed25519Crypto::generate()));
        let bob = NodeIdentity::new("2".to_string(), Arc::new(Ed25519Crypto::generate()));

        let packet = alice
            .reliable_packet(5, GameMessage::ScoreClaim { score: 1 })
            .unwrap();

        match packet {
            Packet::Reliable {
                message_id,
                sender,
                message,
                signature,
            } => {
                assert_eq!(sender, "1");
                assert!(bob.verify_reliable(&alice.public_key(), message_id, &sender, &message, &signature));
                assert!(!bob.verify_reliable(&bob.public_key(), message_id, &sender, &message, &signature));
                assert!(!bob.verify_reliable(&alice.public_key(), message_id, "2", &message, &signature));
            }
            _ => panic!("Expected a reliable packet"),
        }
    }
}
