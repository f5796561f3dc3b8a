//! Merkle tree construction for block transaction commitments

use crate::types::{double_sha256, Hash, Transaction, ZERO_HASH};

/// Hash of two concatenated merkle branches.
fn hash_merkle_branches(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    double_sha256(&buf)
}

/// Build the full merkle tree store for the passed transactions.
///
/// The store is the linearized array representation of the tree: leaves
/// first, then each level, the root last. A level with an odd number of
/// nodes duplicates its final node; validators neutralize the resulting
/// CVE-2012-2459 ambiguity by rejecting blocks with duplicate txids.
pub fn build_merkle_tree_store(transactions: &[Transaction]) -> Vec<Hash> {
    if transactions.is_empty() {
        return vec![ZERO_HASH];
    }

    // Next power of two bounds the number of leaf slots. A single leaf
    // still occupies a two-slot level so the root commits to the
    // duplicated pair.
    let next_pot = transactions.len().next_power_of_two().max(2);
    let store_size = next_pot * 2 - 1;
    let mut store = vec![ZERO_HASH; store_size];
    let mut present = vec![false; store_size];

    for (i, tx) in transactions.iter().enumerate() {
        store[i] = tx.hash();
        present[i] = true;
    }

    let mut offset = next_pot;
    for i in (0..store_size - 1).step_by(2) {
        let (left, left_ok) = (store[i], present[i]);
        let (right, right_ok) = (store[i + 1], present[i + 1]);
        if !left_ok {
            // Parent of two empty slots stays empty.
        } else if !right_ok {
            // Odd level: duplicate the last node.
            store[offset] = hash_merkle_branches(&left, &left);
            present[offset] = true;
        } else {
            store[offset] = hash_merkle_branches(&left, &right);
            present[offset] = true;
        }
        offset += 1;
    }

    store
}

/// Merkle root of the passed transactions.
pub fn calc_merkle_root(transactions: &[Transaction]) -> Hash {
    let store = build_merkle_tree_store(transactions);
    store[store.len() - 1]
}
