use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Signing capability a node carries for its lifetime.
pub trait Crypto: Send + Sync {
    fn public_key(&self) -> Vec<u8>;

    fn sign(&self, message: &[u8]) -> Vec<u8>;

    /// Checks `signature` over `message` against someone else's public key.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;

    fn encode_public_key(&self) -> String {
        encode_public_key(&self.public_key())
    }
}

pub fn encode_public_key(public_key: &[u8]) -> String {
    hex::encode(public_key)
}

pub struct Ed25519Crypto {
    signing_key: SigningKey,
}

impl Ed25519Crypto {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }
}

impl Crypto for Ed25519Crypto {
    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let alice = Ed25519Crypto::generate();
        let bob = Ed25519Crypto::generate();

        let signature = alice.sign(b"move");
        assert!(bob.verify(&alice.public_key(), b"move", &signature));
        assert!(!bob.verify(&alice.public_key(), b"moves", &signature));
        assert!(!bob.verify(&bob.public_key(), b"move", &signature));
    }

    #[test]
    fn test_verify_rejects_malformed_inputs() {
        let crypto = Ed25519Crypto::from_secret([9; 32]);
        let signature = crypto.sign(b"x");
        assert!(!crypto.verify(&[1, 2, 3], b"x", &signature));
        assert!(!crypto.verify(&crypto.public_key(), b"x", &signature[..10]));
    }

    #[test]
    fn test_public_key_encoding() {
        let crypto = Ed25519Crypto::from_secret([1; 32]);
        let encoded = crypto.encode_public_key();
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded, hex::encode(crypto.public_key()));
    }
}
