//! Block validation
//!
//! Context-free sanity runs on receipt of any block; contextual checks run
//! against the parent once the block links into the chain. The validator
//! signature is checked at connect time against the validate key set in
//! effect at the parent, since side-chain state is unknown until a
//! reorganization walks the branch.

use std::collections::HashSet;

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1};

use crate::constants::{MAX_BLOCK_SIZE, MAX_TIME_OFFSET_SECONDS, MEDIAN_TIME_BLOCKS};
use crate::error::{ConsensusError, Result};
use crate::mediantime::MedianTimeSource;
use crate::merkle::calc_merkle_root;
use crate::params::ChainParams;
use crate::pow::check_header_target;
use crate::transaction::check_transaction_sanity;
use crate::types::{hash_to_string, Block, BlockHeader};

/// Context-free block checks.
pub fn check_block_sanity(
    block: &Block,
    params: &ChainParams,
    time_source: &dyn MedianTimeSource,
) -> Result<()> {
    if block.transactions.is_empty() {
        return Err(ConsensusError::NoTransactions);
    }
    if !block.transactions[0].is_coinbase() {
        return Err(ConsensusError::FirstTxNotCoinbase);
    }
    for (index, tx) in block.transactions.iter().enumerate().skip(1) {
        if tx.is_coinbase() {
            return Err(ConsensusError::MultipleCoinbases(format!(
                "transaction {} has a coinbase input",
                index
            )));
        }
    }

    let serialized_size = block.serialize_size();
    if serialized_size > MAX_BLOCK_SIZE {
        return Err(ConsensusError::WrongBlockSize(format!(
            "serialized size {} exceeds the limit {}",
            serialized_size, MAX_BLOCK_SIZE
        )));
    }
    // The size field is hashed, so it cannot cover the signature that is
    // attached after hashing; it commits to the unsigned serialization.
    let base_size = block.base_size();
    if block.header.size as usize != base_size {
        return Err(ConsensusError::WrongBlockSize(format!(
            "header claims {} bytes, block serializes to {} unsigned",
            block.header.size, base_size
        )));
    }

    check_header_target(&block.header, params.pow_limit_bits)?;

    let max_timestamp = time_source.adjusted_time() + MAX_TIME_OFFSET_SECONDS;
    if block.header.timestamp > max_timestamp {
        return Err(ConsensusError::TimeTooNew(format!(
            "timestamp {} is beyond the allowed future bound {}",
            block.header.timestamp, max_timestamp
        )));
    }

    for tx in &block.transactions {
        check_transaction_sanity(tx)?;
    }

    // Duplicate txids would let distinct transaction lists share a merkle
    // root through odd-level duplication.
    let mut seen = HashSet::new();
    for tx in &block.transactions {
        if !seen.insert(tx.hash()) {
            return Err(ConsensusError::DuplicateTx(hash_to_string(&tx.hash())));
        }
    }

    let merkle_root = calc_merkle_root(&block.transactions);
    if merkle_root != block.header.merkle_root {
        return Err(ConsensusError::BadMerkleRoot(format!(
            "computed {} but the header commits to {}",
            hash_to_string(&merkle_root),
            hash_to_string(&block.header.merkle_root)
        )));
    }

    Ok(())
}

/// Contextual header checks against the parent's chain state.
pub fn check_block_header_context(
    header: &BlockHeader,
    parent_height: u32,
    parent_median_time: i64,
    params: &ChainParams,
) -> Result<()> {
    if header.height != parent_height + 1 {
        return Err(ConsensusError::BadBlockHeight(format!(
            "height {} does not extend parent height {}",
            header.height, parent_height
        )));
    }
    // No difficulty retargeting on this chain: every block carries the
    // limit bits.
    if header.bits != params.pow_limit_bits {
        return Err(ConsensusError::BadDifficulty(format!(
            "bits {:#010x}, expected {:#010x}",
            header.bits, params.pow_limit_bits
        )));
    }
    if header.timestamp <= parent_median_time {
        return Err(ConsensusError::TimeTooOld(format!(
            "timestamp {} not after the past median time {}",
            header.timestamp, parent_median_time
        )));
    }
    Ok(())
}

/// Past median time over the most recent ancestor timestamps (up to
/// MEDIAN_TIME_BLOCKS of them).
pub fn past_median_time(recent_timestamps: &[i64]) -> i64 {
    let mut window: Vec<i64> = recent_timestamps
        .iter()
        .take(MEDIAN_TIME_BLOCKS)
        .copied()
        .collect();
    if window.is_empty() {
        return 0;
    }
    window.sort_unstable();
    window[window.len() / 2]
}

/// The validate key whose signature the header carries, if any member of the
/// set verifies it.
pub fn block_signer(header: &BlockHeader, validate_keys: &HashSet<PublicKey>) -> Option<PublicKey> {
    let signature = Signature::from_der(&header.validator_sig).ok()?;
    let message = Message::from_digest(header.block_hash());
    let secp = Secp256k1::verification_only();
    validate_keys
        .iter()
        .find(|key| secp.verify_ecdsa(&message, &signature, key).is_ok())
        .copied()
}

/// Verify the header's validator signature against the validate key set in
/// effect at the block's parent. Any member key may sign.
pub fn check_validator_signature(
    header: &BlockHeader,
    validate_keys: &HashSet<PublicKey>,
) -> Result<()> {
    match block_signer(header, validate_keys) {
        Some(_) => Ok(()),
        None => Err(ConsensusError::BadValidatorSignature(
            "no validate key verifies the header".to_string(),
        )),
    }
}
