//! Unspent transaction output view
//!
//! The view maps outpoints to unspent outputs together with the height that
//! created them and whether they came from a coinbase. Connecting a block
//! records a journal of spent entries; disconnecting with that journal is a
//! total inverse of the connect.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ConsensusError, Result};
use crate::types::{hash_to_string, Block, OutPoint, Transaction, TxOut};

/// One unspent output with its creation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub tx_out: TxOut,
    pub height: u32,
    pub is_coinbase: bool,
}

/// Journal record for one spent output, sufficient to restore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentTxOut {
    pub prev_out: OutPoint,
    pub entry: UtxoEntry,
}

/// In-memory view over the unspent output set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoViewpoint {
    entries: HashMap<OutPoint, UtxoEntry>,
}

impl UtxoViewpoint {
    pub fn new() -> UtxoViewpoint {
        UtxoViewpoint::default()
    }

    pub fn lookup(&self, out_point: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(out_point)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert all outputs of a transaction at the given height.
    pub fn add_tx_outs(&mut self, tx: &Transaction, height: u32, is_coinbase: bool) {
        let tx_hash = tx.hash();
        for (index, tx_out) in tx.outputs.iter().enumerate() {
            self.entries.insert(
                OutPoint::new(tx_hash, index as u32),
                UtxoEntry {
                    tx_out: tx_out.clone(),
                    height,
                    is_coinbase,
                },
            );
        }
    }

    /// Consume an entry, appending a journal record for later undo.
    pub fn spend(&mut self, out_point: &OutPoint, journal: &mut Vec<SpentTxOut>) -> Result<UtxoEntry> {
        let entry = self.entries.remove(out_point).ok_or_else(|| {
            ConsensusError::MissingTx(format!(
                "output {}:{} is not in the view",
                hash_to_string(&out_point.hash),
                out_point.index
            ))
        })?;
        journal.push(SpentTxOut {
            prev_out: *out_point,
            entry: entry.clone(),
        });
        Ok(entry)
    }

    /// Spend a transaction's inputs and insert its outputs.
    pub fn connect_transaction(
        &mut self,
        tx: &Transaction,
        height: u32,
        is_coinbase: bool,
        journal: &mut Vec<SpentTxOut>,
    ) -> Result<()> {
        if !is_coinbase {
            for input in &tx.inputs {
                self.spend(&input.prev_out, journal)?;
            }
        }
        self.add_tx_outs(tx, height, is_coinbase);
        Ok(())
    }

    /// Apply every transaction of a block in order, returning the journal.
    pub fn connect_block(&mut self, block: &Block) -> Result<Vec<SpentTxOut>> {
        let mut journal = Vec::new();
        for (index, tx) in block.transactions.iter().enumerate() {
            self.connect_transaction(tx, block.header.height, index == 0, &mut journal)?;
        }
        Ok(journal)
    }

    /// Exact inverse of `connect_block` for a block previously applied with
    /// the returned journal.
    ///
    /// The undo walks the transactions newest first and, for each one,
    /// removes its created outputs before restoring its spent inputs. A
    /// transaction spending an output created earlier in the same block is
    /// thereby undone before that output is re-created.
    pub fn disconnect_block(&mut self, block: &Block, journal: &[SpentTxOut]) -> Result<()> {
        let mut journal_tail = journal.len();
        for (tx_index, tx) in block.transactions.iter().enumerate().rev() {
            let tx_hash = tx.hash();
            for index in (0..tx.outputs.len()).rev() {
                let out_point = OutPoint::new(tx_hash, index as u32);
                if self.entries.remove(&out_point).is_none() {
                    return Err(ConsensusError::Internal(format!(
                        "disconnect of {} output {} not present in view",
                        hash_to_string(&tx_hash),
                        index
                    )));
                }
            }
            // The coinbase spends nothing; every other transaction appended
            // one journal entry per input, in input order.
            if tx_index == 0 {
                continue;
            }
            let spent_count = tx.inputs.len();
            if journal_tail < spent_count {
                return Err(ConsensusError::Internal(format!(
                    "journal holds {} entries, transaction {} spent {}",
                    journal_tail, tx_index, spent_count
                )));
            }
            for spent in journal[journal_tail - spent_count..journal_tail].iter().rev() {
                if self
                    .entries
                    .insert(spent.prev_out, spent.entry.clone())
                    .is_some()
                {
                    return Err(ConsensusError::Internal(format!(
                        "restored output {}:{} already present in view",
                        hash_to_string(&spent.prev_out.hash),
                        spent.prev_out.index
                    )));
                }
            }
            journal_tail -= spent_count;
        }
        if journal_tail != 0 {
            return Err(ConsensusError::Internal(format!(
                "{} journal entries not consumed by disconnect",
                journal_tail
            )));
        }
        Ok(())
    }
}
