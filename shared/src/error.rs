//! Error taxonomy shared by the node and the coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures talking to the coordination server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("coordinator unreachable: {0}")]
    Disconnected(String),

    #[error("public key already registered: {0}")]
    KeyAlreadyRegistered(String),

    #[error("address already registered: {0}")]
    AddressAlreadyRegistered(String),

    #[error("coordinator does not know public key {0}")]
    UnknownKey(String),
}

impl MembershipError {
    /// Identity errors mean this node cannot establish who it is.
    pub fn is_identity_error(&self) -> bool {
        matches!(
            self,
            MembershipError::KeyAlreadyRegistered(_) | MembershipError::AddressAlreadyRegistered(_)
        )
    }
}

impl From<RpcError> for MembershipError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::KeyAlreadyRegistered(key) => MembershipError::KeyAlreadyRegistered(key),
            RpcError::AddressAlreadyRegistered(addr) => MembershipError::AddressAlreadyRegistered(addr),
            RpcError::UnknownKey(key) => MembershipError::UnknownKey(key),
        }
    }
}

/// Rejections the coordinator puts on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum RpcError {
    KeyAlreadyRegistered(String),
    AddressAlreadyRegistered(String),
    UnknownKey(String),
}

/// Reasons a move, commitment or score claim is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid move: {0}")]
    InvalidMove(String),

    #[error("move out of bounds: {0}")]
    OutOfBounds(String),

    #[error("incorrect player: {0}")]
    IncorrectPlayer(String),

    #[error("player {0} is not on the prey")]
    InvalidPreyCapture(String),

    #[error("invalid score update to {0}")]
    InvalidScoreUpdate(u32),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode packet: {0}")]
    Encode(String),

    #[error("failed to decode packet: {0}")]
    Decode(String),

    #[error("packet of {0} bytes exceeds the datagram limit")]
    Oversized(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_conversion() {
        let err: MembershipError = RpcError::UnknownKey("abc".to_string()).into();
        assert_eq!(err, MembershipError::UnknownKey("abc".to_string()));
        assert!(!err.is_identity_error());

        let err: MembershipError = RpcError::KeyAlreadyRegistered("abc".to_string()).into();
        assert!(err.is_identity_error());

        let err: MembershipError = RpcError::AddressAlreadyRegistered("127.0.0.1:1".to_string()).into();
        assert!(err.is_identity_error());
    }

    #[test]
    fn test_error_messages() {
        let err = ValidationError::InvalidScoreUpdate(4);
        assert_eq!(err.to_string(), "invalid score update to 4");

        let err = MembershipError::Disconnected("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
