//! Transaction validation
//!
//! Three layers, run in order by block connection: context-free sanity,
//! output validation against the admin key state, and input validation
//! against the UTXO view. Output validation walks outputs in ascending
//! index order so in-transaction ASP allocations see their predecessors.

use crate::constants::{
    LOCK_TIME_THRESHOLD, MAX_ATOMS, MAX_BLOCK_SIZE, MAX_FEE, MAX_TX_IN_SEQUENCE_NUM,
    SEQUENCE_LOCK_TIME_DISABLED, SEQUENCE_LOCK_TIME_GRANULARITY, SEQUENCE_LOCK_TIME_IS_SECONDS,
    SEQUENCE_LOCK_TIME_MASK,
};
use crate::error::{ConsensusError, Result};
use crate::keyview::KeyViewpoint;
use crate::params::ChainParams;
use crate::script::{self, ScriptClass};
use crate::types::{Amount, Transaction, TxOut};
use crate::utxoview::UtxoViewpoint;

/// Context-free transaction shape rules.
pub fn check_transaction_sanity(tx: &Transaction) -> Result<()> {
    if tx.inputs.is_empty() {
        return Err(ConsensusError::InvalidTx(
            "transaction has no inputs".to_string(),
        ));
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::InvalidTx(
            "transaction has no outputs".to_string(),
        ));
    }
    if tx.serialize_size() > MAX_BLOCK_SIZE {
        return Err(ConsensusError::InvalidTx(format!(
            "serialized size {} exceeds the block size limit",
            tx.serialize_size()
        )));
    }

    let mut total: Amount = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value < 0 || output.value > MAX_ATOMS {
            return Err(ConsensusError::BadTxOutValue(format!(
                "output {} value {} outside [0, {}]",
                index, output.value, MAX_ATOMS
            )));
        }
        total = total.checked_add(output.value).filter(|t| *t <= MAX_ATOMS).ok_or_else(|| {
            ConsensusError::BadTxOutValue("sum of outputs exceeds the maximum supply".to_string())
        })?;
    }

    let mut seen = std::collections::HashSet::new();
    for input in &tx.inputs {
        if !seen.insert(input.prev_out) {
            return Err(ConsensusError::DuplicateTxInput(format!(
                "outpoint {}:{} referenced twice",
                crate::types::hash_to_string(&input.prev_out.hash),
                input.prev_out.index
            )));
        }
    }

    match script::extract_thread_id(&tx.outputs[0].pk_script) {
        Some(thread) => check_admin_tx_sanity(tx, thread),
        None => {
            // Only admin transactions may carry a thread output, and only at
            // position 0.
            for (index, output) in tx.outputs.iter().enumerate() {
                if script::script_class(&output.pk_script) == ScriptClass::ProvaAdmin {
                    return Err(ConsensusError::InvalidAdminTx(format!(
                        "thread output at position {} of a non-admin transaction",
                        index
                    )));
                }
            }
            Ok(())
        }
    }
}

/// Structural rules for admin transactions, per thread.
fn check_admin_tx_sanity(tx: &Transaction, thread: crate::types::ThreadId) -> Result<()> {
    use crate::types::ThreadId;

    if tx.outputs[0].value != 0 {
        return Err(ConsensusError::InvalidAdminTx(
            "thread continuation output carries value".to_string(),
        ));
    }

    match thread {
        ThreadId::Root | ThreadId::Provision => {
            if tx.inputs.len() != 1 {
                return Err(ConsensusError::InvalidAdminTx(format!(
                    "admin transaction has {} inputs, expected 1",
                    tx.inputs.len()
                )));
            }
            if tx.outputs.len() < 2 {
                return Err(ConsensusError::InvalidAdminTx(
                    "admin transaction carries no operations".to_string(),
                ));
            }
            for (index, output) in tx.outputs.iter().enumerate().skip(1) {
                if output.value != 0 {
                    return Err(ConsensusError::InvalidAdminTx(format!(
                        "admin operation output {} carries value",
                        index
                    )));
                }
                let pops = script::parse_script(&output.pk_script).map_err(|e| {
                    ConsensusError::InvalidAdminTx(format!("unparsable output {}: {}", index, e))
                })?;
                if !script::is_valid_admin_op(&pops, thread) {
                    return Err(ConsensusError::InvalidAdminTx(format!(
                        "output {} is not a valid {} thread operation",
                        index, thread
                    )));
                }
            }
            Ok(())
        }
        ThreadId::Issue => match tx.inputs.len() {
            // Issuance: mint value into Prova outputs.
            1 => {
                if tx.outputs.len() < 2 {
                    return Err(ConsensusError::InvalidAdminTx(
                        "issuance mints no outputs".to_string(),
                    ));
                }
                for (index, output) in tx.outputs.iter().enumerate().skip(1) {
                    let class = script::script_class(&output.pk_script);
                    if !matches!(class, ScriptClass::Prova | ScriptClass::GeneralProva) {
                        return Err(ConsensusError::InvalidAdminTx(format!(
                            "issuance output {} is not a Prova output",
                            index
                        )));
                    }
                    if output.value <= 0 {
                        return Err(ConsensusError::InvalidAdminTx(format!(
                            "issuance output {} mints no value",
                            index
                        )));
                    }
                }
                Ok(())
            }
            // Destruction: bind the destroyed value in an OP_RETURN output.
            2 => {
                if tx.outputs.len() != 2 {
                    return Err(ConsensusError::InvalidAdminTx(
                        "destruction must have exactly the thread and bind outputs".to_string(),
                    ));
                }
                if script::script_class(&tx.outputs[1].pk_script) != ScriptClass::NullData {
                    return Err(ConsensusError::InvalidAdminTx(
                        "destruction bind output is not null data".to_string(),
                    ));
                }
                if tx.outputs[1].value <= 0 {
                    return Err(ConsensusError::InvalidAdminTx(
                        "destruction binds no value".to_string(),
                    ));
                }
                Ok(())
            }
            n => Err(ConsensusError::InvalidAdminTx(format!(
                "issue thread transaction has {} inputs",
                n
            ))),
        },
    }
}

/// Whether a Prova output's key ids all resolve in the view.
fn check_prova_output(output: &TxOut, key_view: &KeyViewpoint) -> Result<()> {
    let key_ids = script::extract_prova_key_ids(&output.pk_script);
    if !key_view.key_ids_exist(&key_ids) {
        return Err(ConsensusError::InvalidTx(format!(
            "output references unknown key ids {:?}",
            key_ids
        )));
    }
    Ok(())
}

/// Validate a transaction's outputs against the admin key state.
///
/// `is_coinbase` reflects the transaction's position in its block: the
/// coinbase alone may carry a null-data output (at most one). Admin
/// operations are probed in output order against a scratch copy of the view,
/// so consecutive ASP allocations in one transaction validate exactly as
/// they will apply.
pub fn check_transaction_outputs(
    tx: &Transaction,
    is_coinbase: bool,
    key_view: &KeyViewpoint,
    _params: &ChainParams,
) -> Result<()> {
    use crate::types::ThreadId;

    if let Some(thread) = script::extract_thread_id(&tx.outputs[0].pk_script) {
        match thread {
            ThreadId::Root | ThreadId::Provision => {
                let mut scratch = key_view.clone();
                scratch.connect_admin_tx(tx, thread)?;
            }
            ThreadId::Issue => {
                if tx.inputs.len() == 1 {
                    for output in &tx.outputs[1..] {
                        check_prova_output(output, key_view)?;
                    }
                }
            }
        }
        return Ok(());
    }

    let mut null_outputs = 0usize;
    for (index, output) in tx.outputs.iter().enumerate() {
        match script::script_class(&output.pk_script) {
            ScriptClass::Prova | ScriptClass::GeneralProva => {
                check_prova_output(output, key_view)?;
            }
            ScriptClass::NullData if is_coinbase => {
                null_outputs += 1;
                if null_outputs > 1 {
                    return Err(ConsensusError::InvalidTx(
                        "coinbase carries more than one null data output".to_string(),
                    ));
                }
            }
            class => {
                return Err(ConsensusError::InvalidTx(format!(
                    "output {} has non-spendable class {:?}",
                    index, class
                )));
            }
        }
    }
    Ok(())
}

/// Validate a transaction's inputs against the UTXO view and return its fee.
///
/// `tx_height` is the height of the block being connected. Issuance
/// transactions are exempt from the inputs ≥ outputs rule; their surplus is
/// the minted amount, not a fee.
pub fn check_transaction_inputs(
    tx: &Transaction,
    tx_height: u32,
    utxo_view: &UtxoViewpoint,
    params: &ChainParams,
) -> Result<Amount> {
    use crate::types::ThreadId;

    if tx.is_coinbase() {
        return Ok(0);
    }

    let thread = script::extract_thread_id(&tx.outputs[0].pk_script);
    let is_issuance = thread == Some(ThreadId::Issue) && tx.inputs.len() == 1;

    let mut total_in: Amount = 0;
    for (index, input) in tx.inputs.iter().enumerate() {
        let entry = utxo_view.lookup(&input.prev_out).ok_or_else(|| {
            ConsensusError::MissingTx(format!(
                "input {} references unknown output {}:{}",
                index,
                crate::types::hash_to_string(&input.prev_out.hash),
                input.prev_out.index
            ))
        })?;

        if entry.is_coinbase {
            let confirmations = tx_height.saturating_sub(entry.height);
            if confirmations < params.coinbase_maturity {
                return Err(ConsensusError::ImmatureSpend(format!(
                    "coinbase output from height {} spent at height {} before maturity {}",
                    entry.height, tx_height, params.coinbase_maturity
                )));
            }
        }

        // Admin thread continuation outputs may only fund input 0 of a
        // same-thread admin transaction.
        if script::script_class(&entry.tx_out.pk_script) == ScriptClass::ProvaAdmin {
            if index != 0 {
                return Err(ConsensusError::InvalidAdminTx(format!(
                    "thread output spent by input {} instead of input 0",
                    index
                )));
            }
            if thread.is_none() {
                return Err(ConsensusError::InvalidAdminTx(
                    "thread output spent by a transaction without a thread output".to_string(),
                ));
            }
            if entry.tx_out.pk_script.get(..2) != tx.outputs[0].pk_script.get(..2) {
                return Err(ConsensusError::InvalidAdminTx(
                    "thread id of the spent output does not match output 0".to_string(),
                ));
            }
        } else if index == 0 && thread.is_some() {
            return Err(ConsensusError::InvalidAdminTx(
                "admin transaction input 0 does not spend a thread output".to_string(),
            ));
        }

        total_in = total_in
            .checked_add(entry.tx_out.value)
            .filter(|t| *t <= MAX_ATOMS)
            .ok_or_else(|| {
                ConsensusError::BadTxOutValue("sum of inputs exceeds the maximum supply".to_string())
            })?;
    }

    if is_issuance {
        return Ok(0);
    }

    let mut total_out: Amount = 0;
    for output in &tx.outputs {
        total_out = total_out.checked_add(output.value).ok_or_else(|| {
            ConsensusError::BadTxOutValue("sum of outputs overflows".to_string())
        })?;
    }

    if total_in < total_out {
        return Err(ConsensusError::SpendTooHigh(format!(
            "outputs {} exceed inputs {}",
            total_out, total_in
        )));
    }
    let fee = total_in - total_out;
    if fee > MAX_FEE {
        return Err(ConsensusError::FeeTooHigh(format!(
            "fee {} exceeds the maximum of {}",
            fee, MAX_FEE
        )));
    }
    Ok(fee)
}

/// Relative lock derived from a transaction's input sequences. A value of -1
/// means the dimension imposes no constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceLock {
    pub seconds: i64,
    pub block_height: i32,
}

impl SequenceLock {
    pub fn unconstrained() -> SequenceLock {
        SequenceLock {
            seconds: -1,
            block_height: -1,
        }
    }
}

/// Whether a sequence lock permits inclusion: the evaluation height must
/// strictly exceed the height lock and the past median time must strictly
/// exceed the time lock.
pub fn sequence_lock_active(lock: &SequenceLock, block_height: i32, median_time: i64) -> bool {
    block_height > lock.block_height && median_time > lock.seconds
}

/// Compute the combined sequence lock of a transaction against the view.
///
/// `mtp_for_height` supplies the past median time of the block at the given
/// height; time-based locks measure from the median time preceding the input
/// block.
pub fn calc_sequence_lock(
    tx: &Transaction,
    utxo_view: &UtxoViewpoint,
    mtp_for_height: impl Fn(u32) -> i64,
) -> Result<SequenceLock> {
    let mut lock = SequenceLock::unconstrained();
    // Relative locks only bind version 2+ transactions, and never the
    // coinbase.
    if tx.version < 2 || tx.is_coinbase() {
        return Ok(lock);
    }
    for (index, input) in tx.inputs.iter().enumerate() {
        let sequence = input.sequence;
        if sequence & SEQUENCE_LOCK_TIME_DISABLED != 0 {
            continue;
        }
        let entry = utxo_view.lookup(&input.prev_out).ok_or_else(|| {
            ConsensusError::MissingTx(format!(
                "sequence lock input {} references unknown output",
                index
            ))
        })?;
        let value = sequence & SEQUENCE_LOCK_TIME_MASK;
        if sequence & SEQUENCE_LOCK_TIME_IS_SECONDS != 0 {
            let prev_mtp = mtp_for_height(entry.height.saturating_sub(1));
            let time_lock = prev_mtp + ((value as i64) << SEQUENCE_LOCK_TIME_GRANULARITY) - 1;
            lock.seconds = lock.seconds.max(time_lock);
        } else {
            let height_lock = entry.height as i64 + value as i64 - 1;
            lock.block_height = lock.block_height.max(height_lock as i32);
        }
    }
    Ok(lock)
}

/// Whether a transaction is finalized with respect to the block that would
/// include it.
pub fn is_finalized_transaction(tx: &Transaction, block_height: u32, block_time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let threshold = if tx.lock_time < LOCK_TIME_THRESHOLD {
        block_height as i64
    } else {
        block_time
    };
    if (tx.lock_time as i64) < threshold {
        return true;
    }
    tx.inputs
        .iter()
        .all(|input| input.sequence == MAX_TX_IN_SEQUENCE_NUM)
}
