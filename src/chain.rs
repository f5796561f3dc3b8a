//! Chain index and fork choice
//!
//! The index is an arena of header nodes with parent links and cumulative
//! work. An incoming block is an orphan (unknown parent, held in a bounded
//! pool), a side-chain block (linked but not applied), a main-chain
//! extension (fully validated and applied), or a reorganization trigger
//! (side branch with strictly more work than the tip).
//!
//! A single writer owns the chain value; readers query snapshots. Every
//! state mutation is journaled so a failing block, a failing reorganization
//! or a mid-flight cancellation leaves the chain exactly as it was.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_bigint::BigUint;
use secp256k1::PublicKey;

use crate::block::{
    check_block_header_context, check_block_sanity, check_validator_signature, past_median_time,
};
use crate::constants::{MAX_ORPHAN_BLOCKS, MEDIAN_TIME_BLOCKS};
use crate::error::{ConsensusError, Result};
use crate::keyview::{AdminTxUndo, KeySetType, KeyViewpoint};
use crate::mediantime::MedianTimeSource;
use crate::params::{calc_block_subsidy, ChainParams};
use crate::pow::calc_work;
use crate::script;
use crate::scriptval::{validate_script_jobs, ScriptJob, ScriptVerifier};
use crate::transaction::{
    calc_sequence_lock, check_transaction_inputs, check_transaction_outputs,
    is_finalized_transaction, sequence_lock_active,
};
use crate::types::{hash_to_string, Amount, Block, BlockHeader, Hash, KeyId, OutPoint, ThreadId};
use crate::utxoview::{SpentTxOut, UtxoEntry, UtxoViewpoint};

/// One header in the index arena.
#[derive(Debug, Clone)]
struct BlockNode {
    hash: Hash,
    parent: Option<usize>,
    height: u32,
    timestamp: i64,
    work_sum: BigUint,
    in_main_chain: bool,
}

/// Journal sufficient to rewind one connected block.
#[derive(Debug, Clone)]
struct BlockUndo {
    stxos: Vec<SpentTxOut>,
    admin_undos: Vec<AdminTxUndo>,
}

/// Outcome of processing a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAcceptance {
    pub is_main_chain: bool,
    pub is_orphan: bool,
}

/// The consensus chain state machine.
pub struct Chain {
    params: ChainParams,
    time_source: Box<dyn MedianTimeSource + Send>,
    nodes: Vec<BlockNode>,
    node_index: HashMap<Hash, usize>,
    best_node: usize,
    utxo_view: UtxoViewpoint,
    key_view: KeyViewpoint,
    blocks: HashMap<Hash, Block>,
    undo_data: HashMap<Hash, BlockUndo>,
    orphans: HashMap<Hash, Block>,
    orphan_order: VecDeque<Hash>,
    script_verifier: Option<Box<dyn ScriptVerifier>>,
    cancel: Arc<AtomicBool>,
}

impl Chain {
    /// Build a chain seeded with the network's genesis block.
    pub fn new(params: ChainParams, time_source: Box<dyn MedianTimeSource + Send>) -> Chain {
        let genesis = params.genesis_block.clone();
        let genesis_hash = genesis.block_hash();

        let mut utxo_view = UtxoViewpoint::new();
        utxo_view.add_tx_outs(&genesis.transactions[0], 0, true);
        let key_view = KeyViewpoint::from_params(&params);

        let node = BlockNode {
            hash: genesis_hash,
            parent: None,
            height: 0,
            timestamp: genesis.header.timestamp,
            work_sum: calc_work(genesis.header.bits),
            in_main_chain: true,
        };

        let mut node_index = HashMap::new();
        node_index.insert(genesis_hash, 0);
        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash, genesis);

        Chain {
            params,
            time_source,
            nodes: vec![node],
            node_index,
            best_node: 0,
            utxo_view,
            key_view,
            blocks,
            undo_data: HashMap::new(),
            orphans: HashMap::new(),
            orphan_order: VecDeque::new(),
            script_verifier: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the external script interpreter. Without one, signature
    /// scripts are not executed (classification rules still apply).
    pub fn set_script_verifier(&mut self, verifier: Box<dyn ScriptVerifier>) {
        self.script_verifier = Some(verifier);
    }

    /// The shared cancellation flag. Long operations poll it between blocks
    /// and restore pre-operation state when it is raised.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Main entry point: run sanity, link the block, and advance the chain
    /// if it wins fork choice.
    pub fn process_block(&mut self, block: Block) -> Result<BlockAcceptance> {
        let hash = block.block_hash();
        if self.node_index.contains_key(&hash) || self.orphans.contains_key(&hash) {
            return Err(ConsensusError::DuplicateBlock(hash_to_string(&hash)));
        }

        check_block_sanity(&block, &self.params, self.time_source.as_ref())?;

        let parent_idx = match self.node_index.get(&block.header.prev_block) {
            Some(idx) => *idx,
            None => {
                self.add_orphan(hash, block);
                return Ok(BlockAcceptance {
                    is_main_chain: false,
                    is_orphan: true,
                });
            }
        };

        let is_main_chain = self.maybe_accept_block(parent_idx, block)?;
        self.process_orphans(hash);
        Ok(BlockAcceptance {
            is_main_chain,
            is_orphan: false,
        })
    }

    /// Whether a block is known, on any chain or in the orphan pool.
    pub fn have_block(&self, hash: &Hash) -> bool {
        self.node_index.contains_key(hash) || self.orphans.contains_key(hash)
    }

    /// Whether the block is part of the current main chain.
    pub fn main_chain_contains(&self, hash: &Hash) -> bool {
        self.node_index
            .get(hash)
            .map(|idx| self.nodes[*idx].in_main_chain)
            .unwrap_or(false)
    }

    /// Height of a known block on any chain.
    pub fn block_height(&self, hash: &Hash) -> Option<u32> {
        self.node_index.get(hash).map(|idx| self.nodes[*idx].height)
    }

    /// Whether the tip is recent enough to consider the chain synced.
    pub fn is_current(&self) -> bool {
        let tip = &self.nodes[self.best_node];
        tip.timestamp >= self.time_source.adjusted_time() - 24 * 60 * 60
    }

    pub fn best_hash(&self) -> Hash {
        self.nodes[self.best_node].hash
    }

    pub fn best_height(&self) -> u32 {
        self.nodes[self.best_node].height
    }

    pub fn best_header(&self) -> BlockHeader {
        self.blocks[&self.nodes[self.best_node].hash].header.clone()
    }

    pub fn utxo_entry(&self, out_point: &OutPoint) -> Option<&UtxoEntry> {
        self.utxo_view.lookup(out_point)
    }

    pub fn admin_keys(&self, set: KeySetType) -> Option<&HashSet<PublicKey>> {
        self.key_view.keys(set)
    }

    pub fn asp_key_ids(&self) -> &HashMap<KeyId, PublicKey> {
        self.key_view.asp_key_ids()
    }

    pub fn last_key_id(&self) -> KeyId {
        self.key_view.last_key_id()
    }

    pub fn thread_tip(&self, thread: ThreadId) -> Option<OutPoint> {
        self.key_view.thread_tip(thread).copied()
    }

    pub fn total_supply(&self) -> u64 {
        self.key_view.total_supply()
    }

    /// Signers of the most recent main-chain blocks, most recent first, for
    /// generation eligibility. Each signer is resolved against the current
    /// validate key set; blocks signed by since-revoked keys are skipped.
    pub fn recent_signers(&self, max_blocks: usize) -> Vec<PublicKey> {
        let validate_keys = match self.key_view.keys(KeySetType::Validate) {
            Some(keys) => keys,
            None => return Vec::new(),
        };
        let mut signers = Vec::new();
        let mut cursor = Some(self.best_node);
        while let Some(idx) = cursor {
            if signers.len() == max_blocks || self.nodes[idx].parent.is_none() {
                break;
            }
            let header = &self.blocks[&self.nodes[idx].hash].header;
            if let Some(signer) = crate::block::block_signer(header, validate_keys) {
                signers.push(signer);
            }
            cursor = self.nodes[idx].parent;
        }
        signers
    }

    fn add_orphan(&mut self, hash: Hash, block: Block) {
        if self.orphan_order.len() == MAX_ORPHAN_BLOCKS {
            if let Some(oldest) = self.orphan_order.pop_front() {
                self.orphans.remove(&oldest);
            }
        }
        self.orphan_order.push_back(hash);
        self.orphans.insert(hash, block);
    }

    /// Accept any orphans that the newly linked block makes connectable.
    fn process_orphans(&mut self, accepted: Hash) {
        let mut parents = vec![accepted];
        while let Some(parent_hash) = parents.pop() {
            let children: Vec<Hash> = self
                .orphans
                .iter()
                .filter(|(_, block)| block.header.prev_block == parent_hash)
                .map(|(hash, _)| *hash)
                .collect();
            for child in children {
                let block = match self.orphans.remove(&child) {
                    Some(block) => block,
                    None => continue,
                };
                self.orphan_order.retain(|hash| *hash != child);
                if let Some(parent_idx) = self.node_index.get(&block.header.prev_block).copied() {
                    // A failing former orphan is simply dropped.
                    if self.maybe_accept_block(parent_idx, block).is_ok() {
                        parents.push(child);
                    }
                }
            }
        }
    }

    /// Past median time of the chain ending at the given node.
    fn median_time_for_node(&self, node_idx: usize) -> i64 {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_BLOCKS);
        let mut cursor = Some(node_idx);
        while let Some(idx) = cursor {
            if timestamps.len() == MEDIAN_TIME_BLOCKS {
                break;
            }
            timestamps.push(self.nodes[idx].timestamp);
            cursor = self.nodes[idx].parent;
        }
        past_median_time(&timestamps)
    }

    /// Main-chain timestamps indexed by height, up to the current tip.
    fn main_chain_timestamps(&self) -> Vec<i64> {
        let mut stamps = vec![0i64; self.nodes[self.best_node].height as usize + 1];
        let mut cursor = Some(self.best_node);
        while let Some(idx) = cursor {
            stamps[self.nodes[idx].height as usize] = self.nodes[idx].timestamp;
            cursor = self.nodes[idx].parent;
        }
        stamps
    }

    /// Link the block into the index and advance or fork the chain.
    fn maybe_accept_block(&mut self, parent_idx: usize, block: Block) -> Result<bool> {
        let parent_median_time = self.median_time_for_node(parent_idx);
        check_block_header_context(
            &block.header,
            self.nodes[parent_idx].height,
            parent_median_time,
            &self.params,
        )?;

        let hash = block.block_hash();
        let node_idx = self.nodes.len();
        self.nodes.push(BlockNode {
            hash,
            parent: Some(parent_idx),
            height: block.header.height,
            timestamp: block.header.timestamp,
            work_sum: self.nodes[parent_idx].work_sum.clone() + calc_work(block.header.bits),
            in_main_chain: false,
        });
        self.node_index.insert(hash, node_idx);
        self.blocks.insert(hash, block);

        if parent_idx == self.best_node {
            match self.connect_tip(node_idx) {
                Ok(()) => Ok(true),
                Err(err) => {
                    self.unlink_last_node(node_idx);
                    Err(err)
                }
            }
        } else if self.nodes[node_idx].work_sum > self.nodes[self.best_node].work_sum {
            match self.reorganize(node_idx) {
                Ok(()) => Ok(true),
                Err(err) => {
                    self.unlink_last_node(node_idx);
                    Err(err)
                }
            }
        } else {
            // Side chain: indexed and stored, not applied. UTXO and key
            // state validation happens if a reorganization adopts it.
            Ok(false)
        }
    }

    /// Remove a just-linked node after its validation failed. Only ever
    /// called for the newest node, which cannot have children yet.
    fn unlink_last_node(&mut self, node_idx: usize) {
        debug_assert_eq!(node_idx, self.nodes.len() - 1);
        let node = self.nodes.pop().expect("node was just linked");
        self.node_index.remove(&node.hash);
        self.blocks.remove(&node.hash);
    }

    /// Fully validate the block at `node_idx` against the current state and
    /// apply it. The node's parent must be the current best tip. On any
    /// failure the views are restored exactly.
    fn connect_tip(&mut self, node_idx: usize) -> Result<()> {
        let node_parent = self.nodes[node_idx].parent.expect("connect of genesis");
        debug_assert_eq!(node_parent, self.best_node);

        let block = self.blocks[&self.nodes[node_idx].hash].clone();
        let height = block.header.height;
        let parent_median_time = self.median_time_for_node(node_parent);
        let main_timestamps = self.main_chain_timestamps();
        let mtp_for_height = |h: u32| {
            let h = (h as usize).min(main_timestamps.len().saturating_sub(1));
            let newest_first: Vec<i64> = main_timestamps[..=h].iter().rev().copied().collect();
            past_median_time(&newest_first)
        };

        // The signer must hold a validate key as of the parent state.
        let validate_keys = self
            .key_view
            .keys(KeySetType::Validate)
            .cloned()
            .unwrap_or_default();
        check_validator_signature(&block.header, &validate_keys)?;

        let utxo_backup = self.utxo_view.clone();
        let key_backup = self.key_view.clone();

        let mut stxos: Vec<SpentTxOut> = Vec::new();
        let mut admin_undos: Vec<AdminTxUndo> = Vec::new();
        let mut spent_scripts: Vec<(usize, usize, crate::types::TxOut)> = Vec::new();
        let mut total_fees: Amount = 0;

        let result = (|| -> Result<()> {
            for (tx_index, tx) in block.transactions.iter().enumerate() {
                if !is_finalized_transaction(tx, height, parent_median_time) {
                    return Err(ConsensusError::UnfinalizedTx(hash_to_string(&tx.hash())));
                }
                check_transaction_outputs(tx, tx_index == 0, &self.key_view, &self.params)?;

                if tx_index > 0 {
                    let fee =
                        check_transaction_inputs(tx, height, &self.utxo_view, &self.params)?;
                    total_fees = total_fees.checked_add(fee).ok_or_else(|| {
                        ConsensusError::BadTxOutValue("total fees overflow".to_string())
                    })?;

                    let lock = calc_sequence_lock(tx, &self.utxo_view, &mtp_for_height)?;
                    if !sequence_lock_active(&lock, height as i32, parent_median_time) {
                        return Err(ConsensusError::UnfinalizedTx(format!(
                            "sequence locks of {} not satisfied",
                            hash_to_string(&tx.hash())
                        )));
                    }

                    for (input_index, input) in tx.inputs.iter().enumerate() {
                        if let Some(entry) = self.utxo_view.lookup(&input.prev_out) {
                            spent_scripts.push((tx_index, input_index, entry.tx_out.clone()));
                        }
                    }
                }

                if let Some(thread) = script::extract_thread_id(&tx.outputs[0].pk_script) {
                    admin_undos.push(self.key_view.connect_admin_tx(tx, thread)?);
                }
                self.utxo_view
                    .connect_transaction(tx, height, tx_index == 0, &mut stxos)?;
            }

            // The coinbase claims exactly the subsidy plus the fees.
            let subsidy = calc_block_subsidy(height, &self.params);
            let coinbase_total: Amount = block.transactions[0]
                .outputs
                .iter()
                .map(|out| out.value)
                .sum();
            if coinbase_total != subsidy + total_fees {
                return Err(ConsensusError::BadCoinbaseValue(format!(
                    "coinbase claims {}, expected {}",
                    coinbase_total,
                    subsidy + total_fees
                )));
            }

            if let Some(verifier) = &self.script_verifier {
                let jobs: Vec<ScriptJob<'_>> = spent_scripts
                    .iter()
                    .map(|(tx_index, input_index, spent_output)| ScriptJob {
                        tx: &block.transactions[*tx_index],
                        tx_index: *tx_index,
                        input_index: *input_index,
                        spent_output: spent_output.clone(),
                    })
                    .collect();
                let workers = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                validate_script_jobs(&jobs, verifier.as_ref(), workers, &self.cancel)?;
            }

            Ok(())
        })();

        match result {
            Ok(()) => {
                self.undo_data.insert(
                    block.block_hash(),
                    BlockUndo {
                        stxos,
                        admin_undos,
                    },
                );
                self.nodes[node_idx].in_main_chain = true;
                self.best_node = node_idx;
                Ok(())
            }
            Err(err) => {
                self.utxo_view = utxo_backup;
                self.key_view = key_backup;
                Err(err)
            }
        }
    }

    /// Rewind the current tip using its journal. The tip's parent becomes
    /// the best node.
    fn disconnect_tip(&mut self) -> Result<()> {
        let tip_idx = self.best_node;
        let parent_idx = self.nodes[tip_idx]
            .parent
            .ok_or_else(|| ConsensusError::Internal("disconnect of genesis".to_string()))?;
        let hash = self.nodes[tip_idx].hash;
        let block = self.blocks[&hash].clone();
        let undo = self
            .undo_data
            .get(&hash)
            .cloned()
            .ok_or_else(|| {
                ConsensusError::Internal(format!("no undo data for {}", hash_to_string(&hash)))
            })?;

        self.utxo_view.disconnect_block(&block, &undo.stxos)?;
        for admin_undo in undo.admin_undos.iter().rev() {
            self.key_view.disconnect_admin_tx(admin_undo)?;
        }
        self.nodes[tip_idx].in_main_chain = false;
        self.best_node = parent_idx;
        Ok(())
    }

    /// Switch the main chain to the branch ending at `candidate_idx`.
    ///
    /// Side-chain blocks were never validated against UTXO or key state;
    /// they are validated now, and any failure (or a raised cancellation
    /// flag) restores the original main chain before returning.
    fn reorganize(&mut self, candidate_idx: usize) -> Result<()> {
        // Walk both branches back to the fork point.
        let mut detach: Vec<usize> = Vec::new();
        let mut attach: Vec<usize> = Vec::new();
        let mut old = self.best_node;
        let mut new = candidate_idx;
        while self.nodes[new].height > self.nodes[old].height {
            attach.push(new);
            new = self.nodes[new].parent.expect("side branch reaches genesis");
        }
        while self.nodes[old].height > self.nodes[new].height {
            detach.push(old);
            old = self.nodes[old].parent.expect("main branch reaches genesis");
        }
        while old != new {
            detach.push(old);
            attach.push(new);
            old = self.nodes[old].parent.expect("branches share genesis");
            new = self.nodes[new].parent.expect("branches share genesis");
        }
        attach.reverse();

        for _ in &detach {
            self.disconnect_tip()?;
        }

        for (connected, node_idx) in attach.iter().enumerate() {
            let cancelled = self.cancel.load(Ordering::Relaxed);
            let result = if cancelled {
                Err(ConsensusError::Internal(
                    "reorganization cancelled".to_string(),
                ))
            } else {
                self.connect_tip(*node_idx)
            };
            if let Err(err) = result {
                // Restore the original main chain completely.
                for _ in 0..connected {
                    self.disconnect_tip()
                        .map_err(|e| ConsensusError::Internal(e.to_string()))?;
                }
                self.reconnect_detached(&detach)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Re-connect the previously detached main-chain blocks, oldest first.
    fn reconnect_detached(&mut self, detach: &[usize]) -> Result<()> {
        for node_idx in detach.iter().rev() {
            self.connect_tip(*node_idx).map_err(|err| {
                ConsensusError::Internal(format!(
                    "failed to restore previously valid block: {}",
                    err
                ))
            })?;
        }
        Ok(())
    }
}
