//! RFC 6962-style Merkle tree with inclusion proofs.
//!
//! Leaf hashes are domain-separated with a `0x00` prefix and internal
//! nodes with `0x01`, preventing second pre-image attacks. A level with an
//! odd number of nodes pairs its last node with **itself**; proofs emit a
//! self-sibling for that case so construction and verification agree.

use sha2::{Digest, Sha256};

/// One step of an inclusion proof: the sibling hash and which side the
/// *current* node is on (`is_right = true` means the current node is the
/// left child and the sibling sits on the right).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProofStep {
    /// Hex-encoded sibling hash.
    pub hash: String,
    pub is_right: bool,
}

/// Proof that a leaf is included in the tree under a given root.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InclusionProof {
    /// Index of the leaf being proved.
    pub log_index: u64,
    /// Number of leaves when the proof was generated.
    pub tree_size: u64,
    /// Hex-encoded root the proof verifies against.
    pub root_hash: String,
    /// Sibling path from the leaf to just below the root.
    pub proof: Vec<ProofStep>,
}

/// Merkle tree over leaf hashes, with all levels materialized.
#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaf hashes; the last level holds the root.
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from existing leaf hashes.
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Self {
        let mut tree = Self {
            levels: vec![leaves],
        };
        tree.rebuild();
        tree
    }

    /// Hash raw leaf data with the `0x00` domain separator.
    pub fn leaf_hash(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update([0x00]);
        hasher.update(data);
        hasher.finalize().into()
    }

    /// Hash two child nodes with the `0x01` domain separator.
    pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update([0x01]);
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().into()
    }

    /// Append a leaf hash and rebuild the upper levels.
    pub fn push(&mut self, leaf: [u8; 32]) {
        if self.levels.is_empty() {
            self.levels.push(Vec::new());
        }
        self.levels[0].push(leaf);
        self.rebuild();
    }

    /// Number of leaves.
    pub fn size(&self) -> u64 {
        self.levels.first().map_or(0, |leaves| leaves.len() as u64)
    }

    /// Root hash; `None` for the empty tree.
    pub fn root(&self) -> Option<[u8; 32]> {
        let leaves = self.levels.first()?;
        if leaves.is_empty() {
            return None;
        }
        self.levels.last().map(|level| level[0])
    }

    /// Inclusion proof steps for the leaf at `index`.
    pub fn prove(&self, index: u64) -> Option<Vec<ProofStep>> {
        let leaves = self.levels.first()?;
        let mut idx = usize::try_from(index).ok()?;
        if idx >= leaves.len() {
            return None;
        }

        let mut steps = Vec::new();
        // Walk every level below the root.
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling_idx = idx ^ 1;
            // An odd level duplicates its last node; the sibling is then the
            // node itself.
            let sibling = if sibling_idx < level.len() {
                level[sibling_idx]
            } else {
                level[idx]
            };
            steps.push(ProofStep {
                hash: hex::encode(sibling),
                is_right: idx % 2 == 0,
            });
            idx /= 2;
        }
        Some(steps)
    }

    /// Verify an inclusion proof: recompute the root from `leaf` and the
    /// sibling path and compare with `root`.
    pub fn verify_inclusion(leaf: &[u8; 32], steps: &[ProofStep], root: &[u8; 32]) -> bool {
        let mut current = *leaf;
        for step in steps {
            let Ok(sibling) = hex::decode(&step.hash) else {
                return false;
            };
            let Ok(sibling) = <[u8; 32]>::try_from(sibling) else {
                return false;
            };
            current = if step.is_right {
                Self::node_hash(&current, &sibling)
            } else {
                Self::node_hash(&sibling, &current)
            };
        }
        current == *root
    }

    /// Recompute every level above the leaves.
    fn rebuild(&mut self) {
        let leaves = match self.levels.first() {
            Some(leaves) if !leaves.is_empty() => leaves.clone(),
            _ => {
                self.levels.truncate(1);
                return;
            }
        };

        self.levels = vec![leaves];
        while self.levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let current = self.levels.last().expect("levels never empty here");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = &pair[0];
                // Odd level: the last node is paired with itself.
                let right = pair.get(1).unwrap_or(left);
                next.push(Self::node_hash(left, right));
            }
            self.levels.push(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<[u8; 32]> {
        (0..n)
            .map(|i| MerkleTree::leaf_hash(format!("entry-{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::new();
        assert_eq!(tree.size(), 0);
        assert!(tree.root().is_none());
        assert!(tree.prove(0).is_none());
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let leaf = MerkleTree::leaf_hash(b"only");
        let tree = MerkleTree::from_leaves(vec![leaf]);
        assert_eq!(tree.root().unwrap(), leaf);
        let steps = tree.prove(0).unwrap();
        assert!(steps.is_empty());
        assert!(MerkleTree::verify_inclusion(&leaf, &steps, &leaf));
    }

    #[test]
    fn test_odd_tree_duplicates_last_node() {
        let leaves = leaves(3);
        let tree = MerkleTree::from_leaves(leaves.clone());

        // Hand-computed: root = H(H(l0,l1), H(l2,l2)).
        let left = MerkleTree::node_hash(&leaves[0], &leaves[1]);
        let right = MerkleTree::node_hash(&leaves[2], &leaves[2]);
        assert_eq!(tree.root().unwrap(), MerkleTree::node_hash(&left, &right));
    }

    #[test]
    fn test_inclusion_law_for_all_sizes() {
        // For every n in 1..=8 and every leaf index, prove + verify holds.
        for n in 1..=8usize {
            let leaves = leaves(n);
            let tree = MerkleTree::from_leaves(leaves.clone());
            let root = tree.root().unwrap();
            for (i, leaf) in leaves.iter().enumerate() {
                let steps = tree.prove(i as u64).unwrap();
                assert!(
                    MerkleTree::verify_inclusion(leaf, &steps, &root),
                    "inclusion failed for n={n}, i={i}"
                );
            }
        }
    }

    #[test]
    fn test_wrong_leaf_fails_verification() {
        let leaves = leaves(5);
        let tree = MerkleTree::from_leaves(leaves);
        let root = tree.root().unwrap();
        let steps = tree.prove(3).unwrap();
        let wrong = MerkleTree::leaf_hash(b"imposter");
        assert!(!MerkleTree::verify_inclusion(&wrong, &steps, &root));
    }

    #[test]
    fn test_incremental_push_matches_batch_build() {
        let all = leaves(6);
        let batch = MerkleTree::from_leaves(all.clone());
        let mut incremental = MerkleTree::new();
        for leaf in all {
            incremental.push(leaf);
        }
        assert_eq!(batch.root(), incremental.root());
    }

    #[test]
    fn test_root_changes_on_append() {
        let mut tree = MerkleTree::new();
        tree.push(MerkleTree::leaf_hash(b"a"));
        let first = tree.root().unwrap();
        tree.push(MerkleTree::leaf_hash(b"b"));
        assert_ne!(tree.root().unwrap(), first);
    }
}
