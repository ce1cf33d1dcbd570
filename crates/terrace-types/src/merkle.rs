//! # Merkle Tree
//!
//! Binary SHA-256 Merkle tree used for the transaction root and the state
//! root. Levels pair left-to-right; an odd level duplicates its last node.
//! The empty list commits to the zero hash and a single leaf commits to
//! itself.

use crate::{Hash, ZERO_HASH};
use sha2::{Digest, Sha256};

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Compute the root over `leaves`.
#[must_use]
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(hash_pair(&pair[0], right));
        }
        level = next;
    }
    level[0]
}

/// Compute the sibling path proving inclusion of `leaves[index]`.
///
/// Returns `None` when the index is out of range. A single-leaf tree has
/// an empty proof.
#[must_use]
pub fn merkle_proof(leaves: &[Hash], index: usize) -> Option<Vec<Hash>> {
    if index >= leaves.len() {
        return None;
    }
    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    let mut idx = index;
    while level.len() > 1 {
        let sibling = if idx % 2 == 0 {
            // Left node: sibling is to the right, or itself on an odd edge.
            *level.get(idx + 1).unwrap_or(&level[idx])
        } else {
            level[idx - 1]
        };
        proof.push(sibling);

        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(hash_pair(&pair[0], right));
        }
        level = next;
        idx /= 2;
    }
    Some(proof)
}

/// Verify a proof produced by [`merkle_proof`].
#[must_use]
pub fn verify_proof(root: &Hash, leaf: &Hash, proof: &[Hash], index: usize) -> bool {
    let mut current = *leaf;
    let mut idx = index;
    for sibling in proof {
        current = if idx % 2 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        idx /= 2;
    }
    current == *root
}
