//! Admin key state view
//!
//! One view carries everything the admin threads govern: the four role key
//! sets, the ASP key-id map with its allocation frontier, the three thread
//! tips, and the token supply. Admin operations apply in output order;
//! every connect produces an undo record that reverses it exactly.

use std::collections::{HashMap, HashSet};

use secp256k1::PublicKey;

use crate::constants::MAX_ADMIN_KEY_SET_SIZE;
use crate::error::{ConsensusError, Result};
use crate::params::ChainParams;
use crate::script::{
    self, AdminOp, ADMIN_OP_ASP_KEY_ADD, ADMIN_OP_ASP_KEY_REVOKE, ADMIN_OP_ISSUE_KEY_ADD,
    ADMIN_OP_ISSUE_KEY_REVOKE, ADMIN_OP_PROVISION_KEY_ADD, ADMIN_OP_PROVISION_KEY_REVOKE,
    ADMIN_OP_VALIDATE_KEY_ADD, ADMIN_OP_VALIDATE_KEY_REVOKE,
};
use crate::types::{Amount, KeyId, OutPoint, ThreadId, Transaction};

/// The four admin key roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySetType {
    Root,
    Issue,
    Provision,
    Validate,
}

/// Which key set a non-ASP admin opcode mutates, and whether it adds.
fn op_target(code: u8) -> Option<(KeySetType, bool)> {
    match code {
        ADMIN_OP_ISSUE_KEY_ADD => Some((KeySetType::Issue, true)),
        ADMIN_OP_ISSUE_KEY_REVOKE => Some((KeySetType::Issue, false)),
        ADMIN_OP_PROVISION_KEY_ADD => Some((KeySetType::Provision, true)),
        ADMIN_OP_PROVISION_KEY_REVOKE => Some((KeySetType::Provision, false)),
        ADMIN_OP_VALIDATE_KEY_ADD => Some((KeySetType::Validate, true)),
        ADMIN_OP_VALIDATE_KEY_REVOKE => Some((KeySetType::Validate, false)),
        _ => None,
    }
}

/// Undo record for one connected admin transaction.
#[derive(Debug, Clone)]
pub struct AdminTxUndo {
    pub thread: ThreadId,
    pub prev_tip: OutPoint,
    pub prev_last_key_id: KeyId,
    pub supply_delta: i64,
    pub ops: Vec<AdminOp>,
}

/// View over the admin-governed chain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyViewpoint {
    key_sets: HashMap<KeySetType, HashSet<PublicKey>>,
    asp_key_ids: HashMap<KeyId, PublicKey>,
    last_key_id: KeyId,
    thread_tips: HashMap<ThreadId, OutPoint>,
    total_supply: u64,
}

impl KeyViewpoint {
    /// An empty view. Tests populate it through the setters.
    pub fn new() -> KeyViewpoint {
        KeyViewpoint {
            key_sets: HashMap::new(),
            asp_key_ids: HashMap::new(),
            last_key_id: 0,
            thread_tips: HashMap::new(),
            total_supply: 0,
        }
    }

    /// The view in effect at genesis for the given network.
    pub fn from_params(params: &ChainParams) -> KeyViewpoint {
        let mut tips = HashMap::new();
        for thread in ThreadId::ALL {
            tips.insert(thread, params.genesis_thread_outpoint(thread));
        }
        KeyViewpoint {
            key_sets: params.admin_key_sets.clone(),
            asp_key_ids: params.asp_key_ids.clone(),
            last_key_id: params.initial_last_key_id(),
            thread_tips: tips,
            total_supply: 0,
        }
    }

    pub fn set_keys(&mut self, key_sets: HashMap<KeySetType, HashSet<PublicKey>>) {
        self.key_sets = key_sets;
    }

    pub fn set_key_ids(&mut self, asp_key_ids: HashMap<KeyId, PublicKey>) {
        self.asp_key_ids = asp_key_ids;
    }

    pub fn set_last_key_id(&mut self, last_key_id: KeyId) {
        self.last_key_id = last_key_id;
    }

    pub fn set_thread_tips(&mut self, tips: HashMap<ThreadId, OutPoint>) {
        self.thread_tips = tips;
    }

    pub fn keys(&self, set: KeySetType) -> Option<&HashSet<PublicKey>> {
        self.key_sets.get(&set)
    }

    pub fn key_sets(&self) -> &HashMap<KeySetType, HashSet<PublicKey>> {
        &self.key_sets
    }

    pub fn asp_key_ids(&self) -> &HashMap<KeyId, PublicKey> {
        &self.asp_key_ids
    }

    pub fn last_key_id(&self) -> KeyId {
        self.last_key_id
    }

    pub fn thread_tip(&self, thread: ThreadId) -> Option<&OutPoint> {
        self.thread_tips.get(&thread)
    }

    pub fn thread_tips(&self) -> &HashMap<ThreadId, OutPoint> {
        &self.thread_tips
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    /// Whether every key id exists in the ASP map.
    pub fn key_ids_exist(&self, key_ids: &[KeyId]) -> bool {
        key_ids.iter().all(|id| self.asp_key_ids.contains_key(id))
    }

    /// Apply one admin operation. Errors leave the view untouched.
    fn apply_op(&mut self, op: &AdminOp) -> Result<()> {
        if let Some((set, is_add)) = op_target(op.code) {
            let keys = self.key_sets.entry(set).or_default();
            if is_add {
                if keys.contains(&op.pub_key) {
                    return Err(ConsensusError::InvalidAdminOp(
                        "key is already a member of the set".to_string(),
                    ));
                }
                if keys.len() >= MAX_ADMIN_KEY_SET_SIZE {
                    return Err(ConsensusError::InvalidAdminOp(format!(
                        "set already holds the maximum of {} keys",
                        MAX_ADMIN_KEY_SET_SIZE
                    )));
                }
                keys.insert(op.pub_key);
            } else {
                if !keys.contains(&op.pub_key) {
                    return Err(ConsensusError::InvalidAdminOp(
                        "revoked key is not a member of the set".to_string(),
                    ));
                }
                // An empty validate set would leave no key able to sign the
                // next block.
                if set == KeySetType::Validate && keys.len() == 1 {
                    return Err(ConsensusError::InvalidAdminOp(
                        "revoke would empty the validate key set".to_string(),
                    ));
                }
                keys.remove(&op.pub_key);
            }
            return Ok(());
        }

        match op.code {
            ADMIN_OP_ASP_KEY_ADD => {
                let key_id = op
                    .key_id
                    .ok_or_else(|| ConsensusError::InvalidAdminOp("ASP add without key id".into()))?;
                if key_id == 0 {
                    return Err(ConsensusError::InvalidAdminOp(
                        "key id zero is reserved".to_string(),
                    ));
                }
                if key_id > self.last_key_id + 1 {
                    return Err(ConsensusError::InvalidAdminOp(format!(
                        "key id {} skips the allocation frontier {}",
                        key_id, self.last_key_id
                    )));
                }
                if self.asp_key_ids.contains_key(&key_id) {
                    return Err(ConsensusError::InvalidAdminOp(format!(
                        "key id {} is already mapped",
                        key_id
                    )));
                }
                self.asp_key_ids.insert(key_id, op.pub_key);
                self.last_key_id = self.last_key_id.max(key_id);
            }
            ADMIN_OP_ASP_KEY_REVOKE => {
                let key_id = op.key_id.ok_or_else(|| {
                    ConsensusError::InvalidAdminOp("ASP revoke without key id".into())
                })?;
                match self.asp_key_ids.get(&key_id) {
                    None => {
                        return Err(ConsensusError::InvalidAdminOp(format!(
                            "key id {} is not mapped",
                            key_id
                        )))
                    }
                    Some(mapped) if *mapped != op.pub_key => {
                        return Err(ConsensusError::InvalidAdminOp(format!(
                            "key id {} maps to a different public key",
                            key_id
                        )))
                    }
                    Some(_) => {
                        // Revocation reserves the id: last_key_id never
                        // decreases.
                        self.asp_key_ids.remove(&key_id);
                    }
                }
            }
            code => {
                return Err(ConsensusError::InvalidAdminOp(format!(
                    "unknown admin opcode {:#04x}",
                    code
                )))
            }
        }
        Ok(())
    }

    /// Reverse one previously applied admin operation.
    fn revert_op(&mut self, op: &AdminOp) -> Result<()> {
        if let Some((set, is_add)) = op_target(op.code) {
            let keys = self.key_sets.entry(set).or_default();
            let consistent = if is_add {
                keys.remove(&op.pub_key)
            } else {
                keys.insert(op.pub_key)
            };
            if !consistent {
                return Err(ConsensusError::Internal(
                    "admin op undo does not match the applied state".to_string(),
                ));
            }
            return Ok(());
        }
        match op.code {
            ADMIN_OP_ASP_KEY_ADD => {
                let key_id = op.key_id.expect("validated on connect");
                if self.asp_key_ids.remove(&key_id).is_none() {
                    return Err(ConsensusError::Internal(format!(
                        "undo of ASP add: key id {} not mapped",
                        key_id
                    )));
                }
            }
            ADMIN_OP_ASP_KEY_REVOKE => {
                let key_id = op.key_id.expect("validated on connect");
                if self.asp_key_ids.insert(key_id, op.pub_key).is_some() {
                    return Err(ConsensusError::Internal(format!(
                        "undo of ASP revoke: key id {} already mapped",
                        key_id
                    )));
                }
            }
            code => {
                return Err(ConsensusError::Internal(format!(
                    "undo of unknown admin opcode {:#04x}",
                    code
                )))
            }
        }
        Ok(())
    }

    /// Connect an admin transaction: move the thread tip to output 0 and
    /// apply every operation, or adjust the supply on the issue thread.
    ///
    /// Operations validate as they apply, so the caller can probe a
    /// transaction against a clone of the view before committing.
    pub fn connect_admin_tx(&mut self, tx: &Transaction, thread: ThreadId) -> Result<AdminTxUndo> {
        let prev_tip = self.thread_tips.get(&thread).copied().unwrap_or(OutPoint::new(
            crate::types::ZERO_HASH,
            0,
        ));
        let prev_last_key_id = self.last_key_id;
        let mut applied: Vec<AdminOp> = Vec::new();
        let mut supply_delta: i64 = 0;

        let result = (|| -> Result<()> {
            match thread {
                ThreadId::Root | ThreadId::Provision => {
                    for output in &tx.outputs[1..] {
                        let op = script::extract_admin_op(&output.pk_script).map_err(|e| {
                            ConsensusError::InvalidAdminOp(format!(
                                "unparsable admin operation: {}",
                                e
                            ))
                        })?;
                        self.apply_op(&op)?;
                        applied.push(op);
                    }
                }
                ThreadId::Issue => {
                    supply_delta = issue_supply_delta(tx)?;
                    if supply_delta >= 0 {
                        self.total_supply = self
                            .total_supply
                            .checked_add(supply_delta as u64)
                            .ok_or_else(|| {
                                ConsensusError::InvalidAdminTx("supply overflow".to_string())
                            })?;
                    } else {
                        self.total_supply = self
                            .total_supply
                            .checked_sub(supply_delta.unsigned_abs())
                            .ok_or_else(|| {
                                ConsensusError::Internal(
                                    "destruction exceeds recorded supply".to_string(),
                                )
                            })?;
                    }
                }
            }
            Ok(())
        })();

        if let Err(err) = result {
            // Roll back the partially applied operations.
            for op in applied.iter().rev() {
                let _ = self.revert_op(op);
            }
            self.last_key_id = prev_last_key_id;
            return Err(err);
        }

        self.thread_tips
            .insert(thread, OutPoint::new(tx.hash(), 0));

        Ok(AdminTxUndo {
            thread,
            prev_tip,
            prev_last_key_id,
            supply_delta,
            ops: applied,
        })
    }

    /// Exact inverse of `connect_admin_tx`.
    pub fn disconnect_admin_tx(&mut self, undo: &AdminTxUndo) -> Result<()> {
        for op in undo.ops.iter().rev() {
            self.revert_op(op)?;
        }
        if undo.supply_delta >= 0 {
            self.total_supply = self
                .total_supply
                .checked_sub(undo.supply_delta as u64)
                .ok_or_else(|| {
                    ConsensusError::Internal("supply undo underflow".to_string())
                })?;
        } else {
            self.total_supply += undo.supply_delta.unsigned_abs();
        }
        self.last_key_id = undo.prev_last_key_id;
        self.thread_tips.insert(undo.thread, undo.prev_tip);
        Ok(())
    }
}

impl Default for KeyViewpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Supply change of an issue-thread transaction: positive for issuance
/// (sum of the minted outputs), negative for destruction (value bound in the
/// OP_RETURN output).
pub fn issue_supply_delta(tx: &Transaction) -> Result<Amount> {
    if tx.inputs.len() == 1 {
        let mut minted: Amount = 0;
        for output in &tx.outputs[1..] {
            minted = minted.checked_add(output.value).ok_or_else(|| {
                ConsensusError::InvalidAdminTx("issuance amount overflow".to_string())
            })?;
        }
        Ok(minted)
    } else {
        let destroyed = tx
            .outputs
            .get(1)
            .map(|out| out.value)
            .unwrap_or_default();
        Ok(-destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{admin_asp_script, admin_op_script, prova_thread_script};
    use crate::types::{TxIn, TxOut};
    use secp256k1::{Secp256k1, SecretKey};

    fn key(tag: u8) -> PublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[tag; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
    }

    fn admin_tx(thread: ThreadId, op_scripts: Vec<Vec<u8>>) -> Transaction {
        let mut outputs = vec![TxOut {
            value: 0,
            pk_script: prova_thread_script(thread),
        }];
        outputs.extend(op_scripts.into_iter().map(|pk_script| TxOut {
            value: 0,
            pk_script,
        }));
        Transaction::new(
            1,
            vec![TxIn {
                prev_out: OutPoint::new([9; 32], 0),
                sig_script: vec![],
                sequence: 0xffffffff,
            }],
            outputs,
            0,
        )
    }

    #[test]
    fn test_add_and_undo_restores_state() {
        let mut view = KeyViewpoint::new();
        let before = view.clone();
        let tx = admin_tx(
            ThreadId::Root,
            vec![admin_op_script(ADMIN_OP_ISSUE_KEY_ADD, &key(1))],
        );
        let undo = view.connect_admin_tx(&tx, ThreadId::Root).unwrap();
        assert!(view.keys(KeySetType::Issue).unwrap().contains(&key(1)));
        assert_eq!(
            view.thread_tip(ThreadId::Root),
            Some(&OutPoint::new(tx.hash(), 0))
        );
        view.disconnect_admin_tx(&undo).unwrap();
        assert_eq!(view, before);
    }

    #[test]
    fn test_add_existing_key_rejected() {
        let mut view = KeyViewpoint::new();
        let tx = admin_tx(
            ThreadId::Root,
            vec![admin_op_script(ADMIN_OP_PROVISION_KEY_ADD, &key(1))],
        );
        view.connect_admin_tx(&tx, ThreadId::Root).unwrap();
        let again = admin_tx(
            ThreadId::Root,
            vec![admin_op_script(ADMIN_OP_PROVISION_KEY_ADD, &key(1))],
        );
        let err = view.connect_admin_tx(&again, ThreadId::Root).unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidAdminOp(_)));
    }

    #[test]
    fn test_add_to_full_set_rejected() {
        let mut view = KeyViewpoint::new();
        let mut sets = HashMap::new();
        let full: HashSet<PublicKey> =
            (1..=MAX_ADMIN_KEY_SET_SIZE as u8).map(key).collect();
        sets.insert(KeySetType::Provision, full);
        view.set_keys(sets);
        let tx = admin_tx(
            ThreadId::Root,
            vec![admin_op_script(ADMIN_OP_PROVISION_KEY_ADD, &key(20))],
        );
        let err = view.connect_admin_tx(&tx, ThreadId::Root).unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidAdminOp(_)));
    }

    #[test]
    fn test_revoke_missing_key_rejected() {
        let mut view = KeyViewpoint::new();
        let tx = admin_tx(
            ThreadId::Root,
            vec![admin_op_script(ADMIN_OP_ISSUE_KEY_REVOKE, &key(5))],
        );
        let err = view.connect_admin_tx(&tx, ThreadId::Root).unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidAdminOp(_)));
    }

    #[test]
    fn test_revoke_cannot_empty_validate_set() {
        let mut view = KeyViewpoint::new();
        let mut sets = HashMap::new();
        sets.insert(KeySetType::Validate, [key(1)].into_iter().collect());
        view.set_keys(sets);
        let tx = admin_tx(
            ThreadId::Provision,
            vec![admin_op_script(ADMIN_OP_VALIDATE_KEY_REVOKE, &key(1))],
        );
        let err = view
            .connect_admin_tx(&tx, ThreadId::Provision)
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidAdminOp(_)));
    }

    #[test]
    fn test_asp_sequential_allocation() {
        let mut view = KeyViewpoint::new();
        view.set_last_key_id(1);
        let tx = admin_tx(
            ThreadId::Provision,
            vec![
                admin_asp_script(ADMIN_OP_ASP_KEY_ADD, &key(1), 2),
                admin_asp_script(ADMIN_OP_ASP_KEY_ADD, &key(2), 3),
            ],
        );
        view.connect_admin_tx(&tx, ThreadId::Provision).unwrap();
        assert_eq!(view.last_key_id(), 3);
        assert_eq!(view.asp_key_ids().get(&2), Some(&key(1)));
        assert_eq!(view.asp_key_ids().get(&3), Some(&key(2)));
    }

    #[test]
    fn test_asp_skip_rejected() {
        let mut view = KeyViewpoint::new();
        view.set_last_key_id(1);
        let tx = admin_tx(
            ThreadId::Provision,
            vec![admin_asp_script(ADMIN_OP_ASP_KEY_ADD, &key(1), 3)],
        );
        let err = view
            .connect_admin_tx(&tx, ThreadId::Provision)
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidAdminOp(_)));
    }

    #[test]
    fn test_asp_duplicate_in_tx_rejected_and_rolled_back() {
        let mut view = KeyViewpoint::new();
        view.set_last_key_id(4);
        let before = view.clone();
        let tx = admin_tx(
            ThreadId::Provision,
            vec![
                admin_asp_script(ADMIN_OP_ASP_KEY_ADD, &key(2), 5),
                admin_asp_script(ADMIN_OP_ASP_KEY_ADD, &key(1), 5),
            ],
        );
        let err = view
            .connect_admin_tx(&tx, ThreadId::Provision)
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidAdminOp(_)));
        // The first add must not survive the failure.
        assert_eq!(view, before);
    }

    #[test]
    fn test_asp_revoke_keeps_last_key_id() {
        let mut view = KeyViewpoint::new();
        view.set_last_key_id(2);
        let add = admin_tx(
            ThreadId::Provision,
            vec![admin_asp_script(ADMIN_OP_ASP_KEY_ADD, &key(1), 3)],
        );
        view.connect_admin_tx(&add, ThreadId::Provision).unwrap();
        let revoke = admin_tx(
            ThreadId::Provision,
            vec![admin_asp_script(ADMIN_OP_ASP_KEY_REVOKE, &key(1), 3)],
        );
        view.connect_admin_tx(&revoke, ThreadId::Provision).unwrap();
        assert_eq!(view.last_key_id(), 3);
        assert!(!view.asp_key_ids().contains_key(&3));
    }

    #[test]
    fn test_asp_revoke_wrong_key_rejected() {
        let mut view = KeyViewpoint::new();
        let mut ids = HashMap::new();
        ids.insert(2u32, key(7));
        view.set_key_ids(ids);
        view.set_last_key_id(2);
        let tx = admin_tx(
            ThreadId::Provision,
            vec![admin_asp_script(ADMIN_OP_ASP_KEY_REVOKE, &key(1), 2)],
        );
        let err = view
            .connect_admin_tx(&tx, ThreadId::Provision)
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidAdminOp(_)));
    }

    #[test]
    fn test_issue_supply_round_trip() {
        let mut view = KeyViewpoint::new();
        // Issuance: one input, thread output plus a minted output.
        let issue = Transaction::new(
            1,
            vec![TxIn {
                prev_out: OutPoint::new([9; 32], 0),
                sig_script: vec![],
                sequence: 0xffffffff,
            }],
            vec![
                TxOut {
                    value: 0,
                    pk_script: prova_thread_script(ThreadId::Issue),
                },
                TxOut {
                    value: 8_000_000_000,
                    pk_script: vec![0x51],
                },
            ],
            0,
        );
        let undo = view.connect_admin_tx(&issue, ThreadId::Issue).unwrap();
        assert_eq!(view.total_supply(), 8_000_000_000);

        // Destruction: two inputs, value bound in an OP_RETURN output.
        let destroy = Transaction::new(
            1,
            vec![
                TxIn {
                    prev_out: OutPoint::new(issue.hash(), 0),
                    sig_script: vec![],
                    sequence: 0xffffffff,
                },
                TxIn {
                    prev_out: OutPoint::new(issue.hash(), 1),
                    sig_script: vec![],
                    sequence: 0xffffffff,
                },
            ],
            vec![
                TxOut {
                    value: 0,
                    pk_script: prova_thread_script(ThreadId::Issue),
                },
                TxOut {
                    value: 8_000_000_000,
                    pk_script: vec![crate::script::OP_RETURN],
                },
            ],
            0,
        );
        let undo2 = view.connect_admin_tx(&destroy, ThreadId::Issue).unwrap();
        assert_eq!(view.total_supply(), 0);

        view.disconnect_admin_tx(&undo2).unwrap();
        assert_eq!(view.total_supply(), 8_000_000_000);
        view.disconnect_admin_tx(&undo).unwrap();
        assert_eq!(view.total_supply(), 0);
    }
}
