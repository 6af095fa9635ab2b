//! SHA-256 state roots for read-only snapshots.
//!
//! Leaves are tagged hashes of individual records; the root is a binary fold
//! where an odd node is paired with itself. Callers feed leaves in a
//! deterministic order (the `BTreeMap` iteration order of their state), so
//! two components with identical state always produce the same root.

use sha2::{Digest, Sha256};

/// Hashes one record under a domain tag. Parts are length-prefixed so that
/// `("ab", "c")` and `("a", "bc")` hash differently.
pub fn leaf(tag: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn merkle_root(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"fund-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

/// Serializes 32-byte roots as hex strings.
pub(crate) mod serde_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_depends_on_leaf_order_and_content() {
        let a = leaf(b"acct", &[b"alice", &5u128.to_le_bytes()]);
        let b = leaf(b"acct", &[b"bob", &7u128.to_le_bytes()]);
        let ab = merkle_root(vec![a, b]);
        assert_eq!(ab, merkle_root(vec![a, b]));
        assert_ne!(ab, merkle_root(vec![b, a]));
        assert_ne!(ab, merkle_root(vec![a]));
    }

    #[test]
    fn length_prefix_separates_parts() {
        assert_ne!(leaf(b"t", &[b"ab", b"c"]), leaf(b"t", &[b"a", b"bc"]));
    }

    #[test]
    fn odd_leaf_count_is_stable() {
        let leaves: Vec<[u8; 32]> = (0u8..3).map(|i| leaf(b"n", &[&[i]])).collect();
        assert_eq!(merkle_root(leaves.clone()), merkle_root(leaves));
    }
}
