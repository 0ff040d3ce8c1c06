use crate::Coord;

/// Hash binding a destination to a nonce for the commit-reveal exchange.
pub fn commit_hash(destination: Coord, nonce: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&destination.x.to_le_bytes());
    hasher.update(&destination.y.to_le_bytes());
    hasher.update(&nonce.to_le_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(commit_hash(Coord::new(2, 1), 42), commit_hash(Coord::new(2, 1), 42));
    }

    #[test]
    fn test_hash_depends_on_move_and_nonce() {
        let base = commit_hash(Coord::new(2, 1), 42);
        assert_ne!(base, commit_hash(Coord::new(1, 2), 42));
        assert_ne!(base, commit_hash(Coord::new(2, 1), 43));
    }
}
