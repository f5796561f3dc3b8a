//! Error types for consensus validation

use thiserror::Error;

/// Classified consensus rule violations.
///
/// The variant is the stable classification; the payload carries a
/// human-readable description of the specific failure. A failing block never
/// leaves partial state behind, so callers may match on the variant alone.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("invalid admin transaction: {0}")]
    InvalidAdminTx(String),

    #[error("invalid admin operation: {0}")]
    InvalidAdminOp(String),

    #[error("invalid transaction: {0}")]
    InvalidTx(String),

    #[error("referenced transaction output missing: {0}")]
    MissingTx(String),

    #[error("total outputs exceed total inputs: {0}")]
    SpendTooHigh(String),

    #[error("transaction fee exceeds the allowed maximum: {0}")]
    FeeTooHigh(String),

    #[error("coinbase value mismatch: {0}")]
    BadCoinbaseValue(String),

    #[error("merkle root mismatch: {0}")]
    BadMerkleRoot(String),

    #[error("block timestamp not after median time: {0}")]
    TimeTooOld(String),

    #[error("block timestamp too far in the future: {0}")]
    TimeTooNew(String),

    #[error("unexpected difficulty bits: {0}")]
    BadDifficulty(String),

    #[error("block hash above target: {0}")]
    HighHash(String),

    #[error("validator signature does not verify: {0}")]
    BadValidatorSignature(String),

    #[error("block has no known parent: {0}")]
    Orphan(String),

    #[error("block already known: {0}")]
    DuplicateBlock(String),

    #[error("coinbase output spent before maturity: {0}")]
    ImmatureSpend(String),

    #[error("serialized block size mismatch: {0}")]
    WrongBlockSize(String),

    #[error("block height does not follow parent: {0}")]
    BadBlockHeight(String),

    #[error("transaction is not finalized: {0}")]
    UnfinalizedTx(String),

    #[error("block has no transactions")]
    NoTransactions,

    #[error("first transaction is not a coinbase")]
    FirstTxNotCoinbase,

    #[error("block contains more than one coinbase: {0}")]
    MultipleCoinbases(String),

    #[error("duplicate transaction in block: {0}")]
    DuplicateTx(String),

    #[error("transaction output value out of range: {0}")]
    BadTxOutValue(String),

    #[error("duplicate transaction input: {0}")]
    DuplicateTxInput(String),

    #[error("serialization failure: {0}")]
    Serialization(String),

    #[error("internal consistency failure: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
