//! Block generation
//!
//! Assembly of candidate blocks, header signing, and the nonce search.
//! Solving fans out workers over the 64-bit nonce space; the first worker to
//! find a valid nonce publishes it and the rest observe the shared flag at
//! their next iteration. None of this is consensus; validation never cares
//! how a nonce was found.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::chain::Chain;
use crate::error::{ConsensusError, Result};
use crate::keyview::KeySetType;
use crate::merkle::calc_merkle_root;
use crate::params::{calc_block_subsidy, ChainParams};
use crate::pow::check_header_target;
use crate::ratelimit::is_generation_share_rate_limited;
use crate::types::{
    Amount, Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut, ZERO_HASH,
};
use crate::constants::{MAX_PREV_OUT_INDEX, MAX_TX_IN_SEQUENCE_NUM};

/// Standard coinbase signature script.
pub fn standard_coinbase_script() -> Vec<u8> {
    let tag = b"/prova/";
    let mut script = Vec::with_capacity(1 + tag.len());
    script.push(tag.len() as u8);
    script.extend_from_slice(tag);
    script
}

/// Coinbase transaction claiming the subsidy plus the block fees.
pub fn create_coinbase_tx(
    params: &ChainParams,
    height: u32,
    total_fees: Amount,
    pay_script: Vec<u8>,
) -> Transaction {
    Transaction::new(
        1,
        vec![TxIn {
            prev_out: OutPoint::new(ZERO_HASH, MAX_PREV_OUT_INDEX),
            sig_script: standard_coinbase_script(),
            sequence: MAX_TX_IN_SEQUENCE_NUM,
        }],
        vec![TxOut {
            value: calc_block_subsidy(height, params) + total_fees,
            pk_script: pay_script,
        }],
        0,
    )
}

/// Assemble an unsigned, unsolved block extending the passed tip.
///
/// `total_fees` must equal the fees of `transactions` against the view the
/// block will connect to; the coinbase claims exactly subsidy + fees.
pub fn create_block_template(
    params: &ChainParams,
    prev_header: &BlockHeader,
    timestamp: i64,
    transactions: Vec<Transaction>,
    total_fees: Amount,
    coinbase_pay_script: Vec<u8>,
) -> Block {
    let height = prev_header.height + 1;
    let mut txs = vec![create_coinbase_tx(params, height, total_fees, coinbase_pay_script)];
    txs.extend(transactions);
    let mut block = Block {
        header: BlockHeader {
            version: 1,
            prev_block: prev_header.block_hash(),
            merkle_root: calc_merkle_root(&txs),
            timestamp,
            bits: params.pow_limit_bits,
            height,
            size: 0,
            nonce: 0,
            validator_sig: Vec::new(),
        },
        transactions: txs,
    };
    block.header.size = block.base_size() as u32;
    block
}

/// Sign the header with a validate key. The signature covers the block hash,
/// so the nonce must be final before signing.
pub fn sign_block_header(header: &mut BlockHeader, secret: &SecretKey) {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(header.block_hash());
    header.validator_sig = secp.sign_ecdsa(&message, secret).serialize_der().to_vec();
}

/// Search the nonce space with `workers` parallel strides until the header
/// hash meets its target. Returns false when `max_attempts` nonces were
/// tried without a solution or the cancel flag was raised.
///
/// Nonce 0 is never used, so callers can detect an externally set nonce.
pub fn solve_block_header(
    header: &mut BlockHeader,
    pow_limit_bits: u32,
    workers: usize,
    max_attempts: u64,
    cancel: &AtomicBool,
) -> bool {
    let workers = workers.max(1) as u64;
    let found = AtomicBool::new(false);
    let winning_nonce = AtomicU64::new(0);

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let mut candidate = header.clone();
            let found = &found;
            let winning_nonce = &winning_nonce;
            scope.spawn(move || {
                let mut nonce = 1 + worker;
                while nonce <= max_attempts {
                    if found.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    candidate.nonce = nonce;
                    if check_header_target(&candidate, pow_limit_bits).is_ok() {
                        winning_nonce.store(nonce, Ordering::Relaxed);
                        found.store(true, Ordering::Relaxed);
                        return;
                    }
                    nonce += workers;
                }
            });
        }
    });

    if found.load(Ordering::Relaxed) {
        header.nonce = winning_nonce.load(Ordering::Relaxed);
        true
    } else {
        false
    }
}

/// Whether the key may sign the next block: it must hold a validate key and
/// must not have signed every block in the recent window.
pub fn check_generation_eligibility(
    chain: &Chain,
    pub_key: &PublicKey,
    max_blocks: usize,
) -> Result<()> {
    let is_validate_key = chain
        .admin_keys(KeySetType::Validate)
        .map(|keys| keys.contains(pub_key))
        .unwrap_or(false);
    if !is_validate_key {
        return Err(ConsensusError::BadValidatorSignature(
            "key is not in the validate set".to_string(),
        ));
    }
    let recent = chain.recent_signers(max_blocks);
    if is_generation_share_rate_limited(pub_key, &recent, max_blocks) {
        return Err(ConsensusError::BadValidatorSignature(
            "key is rate limited over the recent window".to_string(),
        ));
    }
    Ok(())
}
