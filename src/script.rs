//! Script classification and admin operation decoding
//!
//! Consensus never executes scripts here; it only recognizes the five
//! standard classes and decodes the payloads it needs: the thread marker of
//! admin transactions, the key-set mutations carried in admin outputs, and
//! the key ids referenced by Prova outputs.

use secp256k1::PublicKey;
use thiserror::Error;

use crate::constants::{KEY_ID_SIZE, MAX_DATA_CARRIER_SIZE, PUB_KEY_BYTES_LEN_COMPRESSED};
use crate::types::{KeyId, ThreadId};

// Push opcodes.
pub const OP_0: u8 = 0x00;
pub const OP_DATA_20: u8 = 0x14;
pub const OP_DATA_33: u8 = 0x21;
pub const OP_DATA_34: u8 = 0x22;
pub const OP_DATA_38: u8 = 0x26;
pub const OP_DATA_75: u8 = 0x4b;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_2: u8 = 0x52;
pub const OP_3: u8 = 0x53;
pub const OP_16: u8 = 0x60;
pub const OP_TRUE: u8 = 0x51;
pub const OP_RETURN: u8 = 0x6a;

// Prova extension opcodes. These byte values are consensus-hashed and must
// match the network.
pub const OP_CHECKSAFEMULTISIG: u8 = 0xba;
pub const OP_CHECKTHREAD: u8 = 0xbb;

// Admin operation bytes. These appear as the first byte of the OP_RETURN
// payload of admin outputs and are consensus-hashed.
pub const ADMIN_OP_ISSUE_KEY_ADD: u8 = 0x01;
pub const ADMIN_OP_ISSUE_KEY_REVOKE: u8 = 0x02;
pub const ADMIN_OP_PROVISION_KEY_ADD: u8 = 0x03;
pub const ADMIN_OP_PROVISION_KEY_REVOKE: u8 = 0x04;
pub const ADMIN_OP_VALIDATE_KEY_ADD: u8 = 0x11;
pub const ADMIN_OP_VALIDATE_KEY_REVOKE: u8 = 0x12;
pub const ADMIN_OP_ASP_KEY_ADD: u8 = 0x13;
pub const ADMIN_OP_ASP_KEY_REVOKE: u8 = 0x14;

/// Script parsing and extraction failures. These are mapped onto classified
/// consensus errors at the call sites that care.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("malformed script: {0}")]
    Malformed(String),
    #[error("non-minimal number encoding")]
    NonMinimalNumber,
    #[error("number out of range")]
    NumberOutOfRange,
    #[error("data push exceeds {MAX_DATA_CARRIER_SIZE} bytes")]
    TooMuchNullData,
    #[error("script is not an admin operation")]
    NotAdminOp,
    #[error("invalid public key in admin operation")]
    InvalidPubKey,
    #[error("script is not an admin thread script")]
    NotThreadScript,
}

/// Classes of script recognized by consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptClass {
    /// None of the recognized forms.
    NonStandard,
    /// OP_RETURN with at most one small data push.
    NullData,
    /// Prova standard 2-of-3 form (subset of GeneralProva).
    Prova,
    /// Generalized m-of-n Prova form.
    GeneralProva,
    /// Admin thread marker.
    ProvaAdmin,
}

/// A single parsed opcode together with its pushed data, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOpcode {
    pub opcode: u8,
    pub data: Vec<u8>,
}

/// Parse a script into opcodes, validating push lengths.
pub fn parse_script(script: &[u8]) -> Result<Vec<ParsedOpcode>, ScriptError> {
    let mut pops = Vec::new();
    let mut i = 0usize;
    while i < script.len() {
        let opcode = script[i];
        i += 1;
        let data_len = match opcode {
            0x01..=OP_DATA_75 => opcode as usize,
            OP_PUSHDATA1 => {
                let n = *script
                    .get(i)
                    .ok_or_else(|| ScriptError::Malformed("truncated OP_PUSHDATA1".into()))?
                    as usize;
                i += 1;
                n
            }
            OP_PUSHDATA2 => {
                let bytes = script
                    .get(i..i + 2)
                    .ok_or_else(|| ScriptError::Malformed("truncated OP_PUSHDATA2".into()))?;
                i += 2;
                u16::from_le_bytes(bytes.try_into().unwrap()) as usize
            }
            OP_PUSHDATA4 => {
                let bytes = script
                    .get(i..i + 4)
                    .ok_or_else(|| ScriptError::Malformed("truncated OP_PUSHDATA4".into()))?;
                i += 4;
                u32::from_le_bytes(bytes.try_into().unwrap()) as usize
            }
            _ => 0,
        };
        let data = if data_len > 0 {
            let bytes = script
                .get(i..i + data_len)
                .ok_or_else(|| ScriptError::Malformed("truncated data push".into()))?;
            i += data_len;
            bytes.to_vec()
        } else {
            Vec::new()
        };
        pops.push(ParsedOpcode { opcode, data });
    }
    Ok(pops)
}

/// Whether the opcode encodes a small integer (OP_0 or OP_1 through OP_16).
fn is_small_int(opcode: u8) -> bool {
    opcode == OP_0 || (OP_1..=OP_16).contains(&opcode)
}

fn as_small_int(opcode: u8) -> u8 {
    if opcode == OP_0 {
        0
    } else {
        opcode - OP_1 + 1
    }
}

/// Whether the parsed opcode can encode an unsigned 32-bit integer: a small
/// int, or a data push no longer than five bytes.
fn is_uint32(pop: &ParsedOpcode) -> bool {
    is_small_int(pop.opcode) || (pop.opcode >= 0x01 && pop.opcode <= 0x05)
}

/// Decode a minimally-encoded script number from a parsed opcode and range
/// check it to the unsigned 32-bit key-id domain.
fn as_key_id(pop: &ParsedOpcode) -> Result<KeyId, ScriptError> {
    if is_small_int(pop.opcode) {
        return Ok(as_small_int(pop.opcode) as KeyId);
    }
    let data = &pop.data;
    if data.is_empty() || data.len() > 5 {
        return Err(ScriptError::NumberOutOfRange);
    }
    // Minimal encoding: the most significant byte carries information beyond
    // the sign bit, and small values use small ints instead of pushes.
    let last = data[data.len() - 1];
    if last & 0x7f == 0 && (data.len() == 1 || data[data.len() - 2] & 0x80 == 0) {
        return Err(ScriptError::NonMinimalNumber);
    }
    if data.len() == 1 && data[0] <= 16 {
        return Err(ScriptError::NonMinimalNumber);
    }
    let mut value: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        value |= (*byte as i64) << (8 * i);
    }
    // The top bit of the last byte is the sign.
    if last & 0x80 != 0 {
        value &= !(0x80i64 << (8 * (data.len() - 1)));
        value = -value;
    }
    if !(0..=KeyId::MAX as i64).contains(&value) {
        return Err(ScriptError::NumberOutOfRange);
    }
    Ok(value as KeyId)
}

/// Minimal script-number encoding of a non-negative integer.
fn script_num_bytes(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    if value == 0 {
        return out;
    }
    while value > 0 {
        out.push((value & 0xff) as u8);
        value >>= 8;
    }
    if out[out.len() - 1] & 0x80 != 0 {
        out.push(0);
    }
    out
}

fn push_data(buf: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => buf.push(OP_0),
        1..=75 => {
            buf.push(data.len() as u8);
            buf.extend_from_slice(data);
        }
        76..=255 => {
            buf.push(OP_PUSHDATA1);
            buf.push(data.len() as u8);
            buf.extend_from_slice(data);
        }
        _ => {
            buf.push(OP_PUSHDATA2);
            buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
            buf.extend_from_slice(data);
        }
    }
}

fn push_int(buf: &mut Vec<u8>, value: i64) {
    if value == 0 {
        buf.push(OP_0);
    } else if (1..=16).contains(&value) {
        buf.push(OP_1 + (value as u8) - 1);
    } else {
        let bytes = script_num_bytes(value);
        push_data(buf, &bytes);
    }
}

/// Returns true for the generalized m-of-n Prova form.
fn is_general_prova(pops: &[ParsedOpcode]) -> bool {
    // The absolute minimum is 3 keys:
    // OP_2 <pkhash> <keyid> <keyid> OP_3 OP_CHECKSAFEMULTISIG
    let s_len = pops.len();
    if s_len < 6 {
        return false;
    }
    if !is_small_int(pops[0].opcode) || !is_small_int(pops[s_len - 2].opcode) {
        return false;
    }
    if pops[s_len - 1].opcode != OP_CHECKSAFEMULTISIG {
        return false;
    }

    let n_sigs = as_small_int(pops[0].opcode) as usize;
    let n_keys = as_small_int(pops[s_len - 2].opcode) as usize;

    // No effective single-sig allowed.
    if n_sigs < 2 {
        return false;
    }

    if s_len - 3 != n_keys {
        return false;
    }

    // Key hashes must all precede key ids; key ids must be distinct u32s.
    let mut n_key_ids = 0usize;
    let mut n_key_hashes = 0usize;
    let mut seen = std::collections::HashSet::new();
    for pop in &pops[1..s_len - 2] {
        if pop.data.len() == 20 && pop.opcode == OP_DATA_20 {
            if n_key_ids > 0 {
                return false;
            }
            n_key_hashes += 1;
        } else if is_uint32(pop) {
            let key_id = match as_key_id(pop) {
                Ok(id) => id,
                Err(_) => return false,
            };
            if !seen.insert(key_id) {
                return false;
            }
            n_key_ids += 1;
        } else {
            return false;
        }
    }

    // Raw key hashes alone must never be able to move funds.
    if n_key_hashes >= n_sigs {
        return false;
    }
    if n_key_ids < n_sigs {
        return false;
    }

    true
}

/// Returns true for the canonical n-1 of n Prova form.
fn is_prova(pops: &[ParsedOpcode]) -> bool {
    if pops.len() < 6 || !is_general_prova(pops) {
        return false;
    }

    // Standard common case: 2-of-3.
    if pops.len() == 6 && pops[0].opcode == OP_2 && pops[4].opcode == OP_3 {
        return true;
    }

    let m = as_small_int(pops[0].opcode);
    let n = as_small_int(pops[pops.len() - 2].opcode);
    m == n - 1
}

/// Returns true for the admin thread marker form.
fn is_prova_admin(pops: &[ParsedOpcode]) -> bool {
    if pops.len() != 2 {
        return false;
    }
    if pops[1].opcode != OP_CHECKTHREAD {
        return false;
    }
    if !is_small_int(pops[0].opcode) {
        return false;
    }
    ThreadId::from_u8(as_small_int(pops[0].opcode)).is_some()
}

/// Returns true for a null data script: a lone OP_RETURN or OP_RETURN with a
/// single push of at most MAX_DATA_CARRIER_SIZE bytes.
fn is_null_data(pops: &[ParsedOpcode]) -> bool {
    if pops.len() == 1 && pops[0].opcode == OP_RETURN {
        return true;
    }
    pops.len() == 2
        && pops[0].opcode == OP_RETURN
        && (is_small_int(pops[1].opcode) || pops[1].opcode <= OP_PUSHDATA4)
        && pops[1].data.len() <= MAX_DATA_CARRIER_SIZE
}

fn type_of_script(pops: &[ParsedOpcode]) -> ScriptClass {
    if is_null_data(pops) {
        ScriptClass::NullData
    } else if is_prova(pops) {
        ScriptClass::Prova
    } else if is_general_prova(pops) {
        ScriptClass::GeneralProva
    } else if is_prova_admin(pops) {
        ScriptClass::ProvaAdmin
    } else {
        ScriptClass::NonStandard
    }
}

/// Classify a raw script. NonStandard is returned when the script does not
/// parse.
pub fn script_class(script: &[u8]) -> ScriptClass {
    match parse_script(script) {
        Ok(pops) => type_of_script(&pops),
        Err(_) => ScriptClass::NonStandard,
    }
}

/// Extract the thread id from an admin thread script.
pub fn extract_thread_id(script: &[u8]) -> Option<ThreadId> {
    let pops = parse_script(script).ok()?;
    if !is_prova_admin(&pops) {
        return None;
    }
    ThreadId::from_u8(as_small_int(pops[0].opcode))
}

/// A decoded admin operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminOp {
    pub code: u8,
    pub pub_key: PublicKey,
    pub key_id: Option<KeyId>,
}

impl AdminOp {
    pub fn is_asp_op(&self) -> bool {
        self.code == ADMIN_OP_ASP_KEY_ADD || self.code == ADMIN_OP_ASP_KEY_REVOKE
    }
}

/// Decode an admin operation from a pkScript of the form
/// `OP_RETURN <data>`, where data is `op ‖ pubkey` or `op ‖ pubkey ‖ keyid`.
pub fn extract_admin_op(script: &[u8]) -> Result<AdminOp, ScriptError> {
    let pops = parse_script(script).map_err(|_| ScriptError::NotAdminOp)?;
    extract_admin_op_parsed(&pops)
}

pub fn extract_admin_op_parsed(pops: &[ParsedOpcode]) -> Result<AdminOp, ScriptError> {
    if pops.len() != 2 || pops[0].opcode != OP_RETURN {
        return Err(ScriptError::NotAdminOp);
    }
    if pops[1].opcode != OP_DATA_34 && pops[1].opcode != OP_DATA_38 {
        return Err(ScriptError::NotAdminOp);
    }
    let data = &pops[1].data;
    let code = data[0];
    let pub_key = PublicKey::from_slice(&data[1..1 + PUB_KEY_BYTES_LEN_COMPRESSED])
        .map_err(|_| ScriptError::InvalidPubKey)?;
    let key_id = if data.len() == 1 + PUB_KEY_BYTES_LEN_COMPRESSED + KEY_ID_SIZE {
        let start = 1 + PUB_KEY_BYTES_LEN_COMPRESSED;
        Some(KeyId::from_le_bytes(
            data[start..start + KEY_ID_SIZE].try_into().unwrap(),
        ))
    } else {
        None
    };
    Ok(AdminOp {
        code,
        pub_key,
        key_id,
    })
}

/// Whether a pkScript is a valid admin operation for the given thread.
///
/// The thread→operation table is consensus: root manages issue and provision
/// keys, provision manages validate and ASP keys, issue carries no
/// operations (issuance is encoded in output layout).
pub fn is_valid_admin_op(pops: &[ParsedOpcode], thread: ThreadId) -> bool {
    let op = match extract_admin_op_parsed(pops) {
        Ok(op) => op,
        Err(_) => return false,
    };
    match thread {
        ThreadId::Root => {
            op.key_id.is_none()
                && matches!(
                    op.code,
                    ADMIN_OP_ISSUE_KEY_ADD
                        | ADMIN_OP_ISSUE_KEY_REVOKE
                        | ADMIN_OP_PROVISION_KEY_ADD
                        | ADMIN_OP_PROVISION_KEY_REVOKE
                )
        }
        ThreadId::Provision => match op.code {
            ADMIN_OP_VALIDATE_KEY_ADD | ADMIN_OP_VALIDATE_KEY_REVOKE => op.key_id.is_none(),
            ADMIN_OP_ASP_KEY_ADD | ADMIN_OP_ASP_KEY_REVOKE => op.key_id.is_some(),
            _ => false,
        },
        ThreadId::Issue => false,
    }
}

/// Extract the key ids referenced by a Prova or GeneralProva script.
pub fn extract_prova_key_ids(script: &[u8]) -> Vec<KeyId> {
    let pops = match parse_script(script) {
        Ok(pops) => pops,
        Err(_) => return Vec::new(),
    };
    if !is_general_prova(&pops) {
        return Vec::new();
    }
    let mut key_ids = Vec::new();
    for pop in &pops[1..pops.len() - 2] {
        if pop.data.len() == 20 && pop.opcode == OP_DATA_20 {
            continue;
        }
        if let Ok(id) = as_key_id(pop) {
            key_ids.push(id);
        }
    }
    key_ids
}

/// Read the thread id and per-output parsed scripts of an admin transaction.
/// Returns None when output 0 is not an admin thread script.
pub fn admin_details(
    tx: &crate::types::Transaction,
) -> Option<(ThreadId, Vec<Result<Vec<ParsedOpcode>, ScriptError>>)> {
    let first = tx.outputs.first()?;
    let pops = parse_script(&first.pk_script).ok()?;
    if type_of_script(&pops) != ScriptClass::ProvaAdmin {
        return None;
    }
    let thread = ThreadId::from_u8(as_small_int(pops[0].opcode))?;
    let rest = tx.outputs[1..]
        .iter()
        .map(|out| parse_script(&out.pk_script))
        .collect();
    Some((thread, rest))
}

/// Build a script paying to a Prova address: m <pkhash> <keyids...> n
/// OP_CHECKSAFEMULTISIG.
pub fn pay_to_prova_script(pk_hash: &[u8; 20], key_ids: &[KeyId]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(26 + key_ids.len() * 5);
    push_int(&mut buf, key_ids.len() as i64);
    push_data(&mut buf, pk_hash);
    for key_id in key_ids {
        push_int(&mut buf, *key_id as i64);
    }
    push_int(&mut buf, key_ids.len() as i64 + 1);
    buf.push(OP_CHECKSAFEMULTISIG);
    buf
}

/// Build the thread continuation script for an admin thread.
pub fn prova_thread_script(thread: ThreadId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2);
    push_int(&mut buf, thread as i64);
    buf.push(OP_CHECKTHREAD);
    buf
}

/// Build a null data script carrying the passed data.
pub fn null_data_script(data: &[u8]) -> Result<Vec<u8>, ScriptError> {
    if data.len() > MAX_DATA_CARRIER_SIZE {
        return Err(ScriptError::TooMuchNullData);
    }
    let mut buf = Vec::with_capacity(2 + data.len());
    buf.push(OP_RETURN);
    if !data.is_empty() {
        push_data(&mut buf, data);
    }
    Ok(buf)
}

/// Build an admin operation script for a key-set mutation.
pub fn admin_op_script(code: u8, pub_key: &PublicKey) -> Vec<u8> {
    let mut data = Vec::with_capacity(1 + PUB_KEY_BYTES_LEN_COMPRESSED);
    data.push(code);
    data.extend_from_slice(&pub_key.serialize());
    let mut buf = Vec::with_capacity(2 + data.len());
    buf.push(OP_RETURN);
    push_data(&mut buf, &data);
    buf
}

/// Build an admin operation script for an ASP key-id mutation.
pub fn admin_asp_script(code: u8, pub_key: &PublicKey, key_id: KeyId) -> Vec<u8> {
    let mut data = Vec::with_capacity(1 + PUB_KEY_BYTES_LEN_COMPRESSED + KEY_ID_SIZE);
    data.push(code);
    data.extend_from_slice(&pub_key.serialize());
    data.extend_from_slice(&key_id.to_le_bytes());
    let mut buf = Vec::with_capacity(2 + data.len());
    buf.push(OP_RETURN);
    push_data(&mut buf, &data);
    buf
}
