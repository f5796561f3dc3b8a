//! Prova consensus constants

use crate::types::Amount;

/// Number of Atoms in one gram (1 DMG).
pub const ATOMS_PER_GRAM: Amount = 1_000_000;

/// Maximum transaction amount allowed in Atoms: 21*10^8 DMG.
pub const MAX_ATOMS: Amount = 2_100_000_000 * ATOMS_PER_GRAM;

/// Maximum fee a single transaction may pay, in Atoms.
pub const MAX_FEE: Amount = 100_000_000;

/// Maximum serialized block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Outpoint index that marks a coinbase input.
pub const MAX_PREV_OUT_INDEX: u32 = 0xffff_ffff;

/// Number of confirmations before a coinbase output may be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Maximum number of keys in any admin key set.
pub const MAX_ADMIN_KEY_SET_SIZE: usize = 10;

/// Maximum number of bytes in an OP_RETURN data push.
pub const MAX_DATA_CARRIER_SIZE: usize = 80;

/// Sequence number that disables all lock-time semantics for an input.
pub const MAX_TX_IN_SEQUENCE_NUM: u32 = 0xffff_ffff;

/// Lock times below this threshold are block heights; above, unix seconds.
pub const LOCK_TIME_THRESHOLD: u32 = 500_000_000;

/// Sequence bit that disables the relative lock for the input.
pub const SEQUENCE_LOCK_TIME_DISABLED: u32 = 1 << 31;

/// Sequence bit selecting time-based rather than height-based locks.
pub const SEQUENCE_LOCK_TIME_IS_SECONDS: u32 = 1 << 22;

/// Mask extracting the relative lock value from a sequence number.
pub const SEQUENCE_LOCK_TIME_MASK: u32 = 0x0000_ffff;

/// Time-based relative locks are in units of 2^9 (512) seconds.
pub const SEQUENCE_LOCK_TIME_GRANULARITY: u32 = 9;

/// Number of ancestor timestamps used for the past median time.
pub const MEDIAN_TIME_BLOCKS: usize = 11;

/// Maximum number of seconds a block timestamp may be ahead of the
/// adjusted network time.
pub const MAX_TIME_OFFSET_SECONDS: i64 = 2 * 60 * 60;

/// Maximum number of orphan blocks held before the oldest is evicted.
pub const MAX_ORPHAN_BLOCKS: usize = 100;

/// Size of a serialized compressed secp256k1 public key.
pub const PUB_KEY_BYTES_LEN_COMPRESSED: usize = 33;

/// Size of a serialized ASP key id.
pub const KEY_ID_SIZE: usize = 4;
