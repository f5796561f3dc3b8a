//! Core Prova types for consensus validation

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

use crate::constants::MAX_PREV_OUT_INDEX;
use crate::wire;

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// The all-zero hash.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Amount in Atoms, the base monetary unit. 1 DMG = 10^6 Atoms.
pub type Amount = i64;

/// ASP key identifier.
pub type KeyId = u32;

/// Double SHA-256, used for transaction and block identities.
pub fn double_sha256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// SHA-256 followed by RIPEMD-160, used for address commitments.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::Ripemd160;
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Render a hash in its little-endian print form (byte-reversed hex).
pub fn hash_to_string(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// One of the three singleton admin threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreadId {
    Root = 0,
    Provision = 1,
    Issue = 2,
}

impl ThreadId {
    pub fn from_u8(value: u8) -> Option<ThreadId> {
        match value {
            0 => Some(ThreadId::Root),
            1 => Some(ThreadId::Provision),
            2 => Some(ThreadId::Issue),
            _ => None,
        }
    }

    pub const ALL: [ThreadId; 3] = [ThreadId::Root, ThreadId::Provision, ThreadId::Issue];
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadId::Root => write!(f, "root"),
            ThreadId::Provision => write!(f, "provision"),
            ThreadId::Issue => write!(f, "issue"),
        }
    }
}

/// OutPoint: a reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> OutPoint {
        OutPoint { hash, index }
    }
}

/// Transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prev_out: OutPoint,
    pub sig_script: Vec<u8>,
    pub sequence: u32,
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub pk_script: Vec<u8>,
}

/// Transaction.
///
/// Two identity hashes exist: `hash` covers the serialization with empty
/// signature scripts and is the txid referenced by outpoints and merkle
/// trees; `hash_with_sig` covers the full serialization and is only relevant
/// to peer-to-peer relay. Both are memoized on first access, so a
/// transaction must not be field-mutated after its identity has been read;
/// build a new value instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    #[serde(skip)]
    hash_cache: OnceLock<Hash>,
    #[serde(skip)]
    hash_with_sig_cache: OnceLock<Hash>,
}

impl Transaction {
    pub fn new(version: u32, inputs: Vec<TxIn>, outputs: Vec<TxOut>, lock_time: u32) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            hash_cache: OnceLock::new(),
            hash_with_sig_cache: OnceLock::new(),
        }
    }

    /// The txid: double SHA-256 over the serialization with signature
    /// scripts blanked out.
    pub fn hash(&self) -> Hash {
        *self
            .hash_cache
            .get_or_init(|| double_sha256(&wire::serialize_transaction(self, false)))
    }

    /// Hash over the full serialization, including signature scripts.
    pub fn hash_with_sig(&self) -> Hash {
        *self
            .hash_with_sig_cache
            .get_or_init(|| double_sha256(&wire::serialize_transaction(self, true)))
    }

    /// Whether the transaction has the synthetic coinbase input shape.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_out.hash == ZERO_HASH
            && self.inputs[0].prev_out.index == MAX_PREV_OUT_INDEX
    }

    pub fn serialize_size(&self) -> usize {
        wire::serialize_transaction(self, true).len()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.lock_time == other.lock_time
    }
}

impl Eq for Transaction {}

/// Block header.
///
/// The block hash covers the fields through `nonce`; the validator signature
/// is excluded so it can be attached after the header is otherwise final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub timestamp: i64,
    pub bits: u32,
    pub height: u32,
    pub size: u32,
    pub nonce: u64,
    pub validator_sig: Vec<u8>,
}

impl BlockHeader {
    pub fn block_hash(&self) -> Hash {
        double_sha256(&wire::serialize_header(self, false))
    }
}

/// Block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn block_hash(&self) -> Hash {
        self.header.block_hash()
    }

    pub fn serialize_size(&self) -> usize {
        wire::serialize_block(self).len()
    }

    /// Serialized size with an empty validator signature. This is the size
    /// the header commits to, since the signature attaches after hashing.
    pub fn base_size(&self) -> usize {
        let sig_len = self.header.validator_sig.len();
        self.serialize_size() - sig_len - wire::varint_size(sig_len as u64) + 1
    }
}
