//! Proofs of inclusion
//!
//! A proof lists, for each ancestor of a node, the hash of the sibling subtree,
//! which side that sibling sits on, and the ancestor's own hash. Folding the
//! sibling hashes onto the node hash reproduces every ancestor and finally the
//! root.

use crate::{CoreError, DataStore, Result, Transaction};
use bitvec::prelude::*;
use datalayer_crypto::{internal_hash, Bytes32};
use datalayer_store::{Side, StorageBackend};
use serde::{Deserialize, Serialize};

/// One level of a proof
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfInclusionLayer {
    /// Side the sibling occupies in the parent
    pub other_hash_side: Side,
    /// Hash of the sibling subtree
    pub other_hash: Bytes32,
    /// Hash of the parent
    pub combined_hash: Bytes32,
}

impl ProofOfInclusionLayer {
    /// Combine a child hash with this layer's sibling
    pub fn combine(&self, child: &Bytes32) -> Bytes32 {
        match self.other_hash_side {
            Side::Left => internal_hash(&self.other_hash, child),
            Side::Right => internal_hash(child, &self.other_hash),
        }
    }
}

/// Proof that a node is included under a root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfInclusion {
    pub node_hash: Bytes32,
    /// Leaf to root
    pub layers: Vec<ProofOfInclusionLayer>,
}

impl ProofOfInclusion {
    /// The root this proof leads to
    pub fn root_hash(&self) -> Bytes32 {
        self.layers
            .last()
            .map_or(self.node_hash, |layer| layer.combined_hash)
    }

    /// Sibling hashes, leaf to root
    pub fn sibling_hashes(&self) -> Vec<Bytes32> {
        self.layers.iter().map(|layer| layer.other_hash).collect()
    }

    /// One bit per layer, set when the sibling is on the right
    pub fn sibling_sides(&self) -> BitVec<u8, Lsb0> {
        self.layers
            .iter()
            .map(|layer| layer.other_hash_side == Side::Right)
            .collect()
    }

    /// Sibling sides packed into an integer, bit `i` for layer `i`
    ///
    /// `None` when the proof is deeper than 128 layers.
    pub fn sibling_sides_integer(&self) -> Option<u128> {
        if self.layers.len() > 128 {
            return None;
        }
        Some(
            self.layers
                .iter()
                .enumerate()
                .filter(|(_, layer)| layer.other_hash_side == Side::Right)
                .fold(0u128, |acc, (index, _)| acc | (1u128 << index)),
        )
    }

    /// Check that `leaf_hash` folds through every layer up to `root_hash`
    pub fn verify(&self, leaf_hash: &Bytes32, root_hash: &Bytes32) -> bool {
        let mut current = *leaf_hash;
        for layer in &self.layers {
            current = layer.combine(&current);
            if current != layer.combined_hash {
                return false;
            }
        }
        current == *root_hash
    }

    /// Check the proof against its own node and root
    pub fn is_valid(&self) -> bool {
        self.verify(&self.node_hash, &self.root_hash())
    }
}

impl<B: StorageBackend> Transaction<'_, B> {
    /// Proof that `node_hash` is under the latest root, or under `root_hash` from history
    pub async fn get_proof_of_inclusion_by_hash(
        &self,
        tree_id: Bytes32,
        node_hash: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<ProofOfInclusion> {
        let heritage = self.get_heritage(tree_id, node_hash, root_hash).await?;

        let mut layers = Vec::with_capacity(heritage.len().saturating_sub(1));
        for pair in heritage.windows(2) {
            let child = pair[0].hash();
            let parent = pair[1].as_internal().ok_or_else(|| {
                CoreError::Integrity(format!("ancestor {} is a terminal", pair[1].hash()))
            })?;
            let side = parent.side_of(&child).ok_or_else(|| {
                CoreError::Integrity(format!("{child} is not a child of {}", parent.hash))
            })?;
            let other_hash_side = side.other();
            layers.push(ProofOfInclusionLayer {
                other_hash_side,
                other_hash: parent.child(other_hash_side),
                combined_hash: parent.hash,
            });
        }

        Ok(ProofOfInclusion { node_hash, layers })
    }

    /// Proof for the terminal holding `key` in the latest root
    pub async fn get_proof_of_inclusion_by_key(
        &self,
        tree_id: Bytes32,
        key: &[u8],
    ) -> Result<ProofOfInclusion> {
        let terminal = self.get_node_by_key(tree_id, key).await?;
        self.get_proof_of_inclusion_by_hash(tree_id, terminal.hash, None)
            .await
    }
}

impl<B: StorageBackend> DataStore<B> {
    /// Proof that `node_hash` is under the latest root, or under `root_hash` from history
    pub async fn get_proof_of_inclusion_by_hash(
        &self,
        tree_id: Bytes32,
        node_hash: Bytes32,
        root_hash: Option<Bytes32>,
    ) -> Result<ProofOfInclusion> {
        self.transaction()
            .await?
            .get_proof_of_inclusion_by_hash(tree_id, node_hash, root_hash)
            .await
    }

    /// Proof for the terminal holding `key`
    pub async fn get_proof_of_inclusion_by_key(
        &self,
        tree_id: Bytes32,
        key: &[u8],
    ) -> Result<ProofOfInclusion> {
        self.transaction()
            .await?
            .get_proof_of_inclusion_by_key(tree_id, key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{add_01234567_example, tree_id};
    use datalayer_crypto::leaf_hash;

    #[tokio::test]
    async fn test_proof_layers_match_tree() {
        let store = DataStore::memory();
        let example = add_01234567_example(&store).await;
        let t = &example.terminal_nodes;
        let i = &example.internal_nodes;
        let root = store.get_tree_root(tree_id()).await.unwrap().node_hash.unwrap();

        // Key 0x04 is the left child of (4, 5)
        let proof = store
            .get_proof_of_inclusion_by_key(tree_id(), &[0x04])
            .await
            .unwrap();

        assert_eq!(proof.node_hash, t[4]);
        assert_eq!(
            proof.layers,
            vec![
                ProofOfInclusionLayer {
                    other_hash_side: Side::Right,
                    other_hash: t[5],
                    combined_hash: i[2],
                },
                ProofOfInclusionLayer {
                    other_hash_side: Side::Right,
                    other_hash: i[3],
                    combined_hash: i[5],
                },
                ProofOfInclusionLayer {
                    other_hash_side: Side::Left,
                    other_hash: i[4],
                    combined_hash: root,
                },
            ]
        );
        assert_eq!(proof.root_hash(), root);
        assert!(proof.is_valid());
        assert_eq!(proof.sibling_sides_integer(), Some(0b011));
        assert_eq!(proof.sibling_sides(), bitvec![u8, Lsb0; 1, 1, 0]);
        assert_eq!(proof.sibling_hashes(), vec![t[5], i[3], i[4]]);
    }

    #[tokio::test]
    async fn test_tampering_breaks_verification() {
        let store = DataStore::memory();
        add_01234567_example(&store).await;
        let root = store.get_tree_root(tree_id()).await.unwrap().node_hash.unwrap();
        let proof = store
            .get_proof_of_inclusion_by_key(tree_id(), &[0x06])
            .await
            .unwrap();

        assert!(proof.verify(&leaf_hash(&[0x06], &[0x16, 0x06]), &root));
        assert!(!proof.verify(&leaf_hash(&[0x06], &[0x16, 0x07]), &root));
        assert!(!proof.verify(&leaf_hash(&[0x07], &[0x16, 0x06]), &root));

        let mut forged = proof.clone();
        forged.layers[1].other_hash = Bytes32::new([0xee; 32]);
        assert!(!forged.verify(&proof.node_hash, &root));
    }

    #[tokio::test]
    async fn test_single_terminal_proof_is_empty() {
        let store = DataStore::memory();
        store.create_tree(tree_id()).await.unwrap();
        let hash = store
            .insert(tree_id(), &b"a"[..], &b"1"[..], None, None)
            .await
            .unwrap();

        let proof = store
            .get_proof_of_inclusion_by_hash(tree_id(), hash, None)
            .await
            .unwrap();
        assert!(proof.layers.is_empty());
        assert_eq!(proof.root_hash(), hash);
        assert_eq!(proof.sibling_sides_integer(), Some(0));
    }

    #[tokio::test]
    async fn test_proof_against_historical_root() {
        let store = DataStore::memory();
        let example = add_01234567_example(&store).await;
        let gen_two = store.get_tree_root_at(tree_id(), 2).await.unwrap();

        let proof = store
            .get_proof_of_inclusion_by_hash(tree_id(), example.terminal_nodes[2], gen_two.node_hash)
            .await
            .unwrap();
        assert_eq!(Some(proof.root_hash()), gen_two.node_hash);

        let err = store
            .get_proof_of_inclusion_by_hash(
                tree_id(),
                example.terminal_nodes[2],
                Some(Bytes32::new([3; 32])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RootNotFound { .. }));
    }

    #[test]
    fn test_sides_integer_limit() {
        let layer = ProofOfInclusionLayer {
            other_hash_side: Side::Right,
            other_hash: Bytes32::ZERO,
            combined_hash: Bytes32::ZERO,
        };
        let proof = ProofOfInclusion {
            node_hash: Bytes32::ZERO,
            layers: vec![layer; 129],
        };
        assert_eq!(proof.sibling_sides_integer(), None);

        let proof = ProofOfInclusion {
            node_hash: Bytes32::ZERO,
            layers: vec![layer; 128],
        };
        assert_eq!(proof.sibling_sides_integer(), Some(u128::MAX));
    }
}
