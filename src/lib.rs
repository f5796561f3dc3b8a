//! # Prova Consensus
//!
//! Full-node consensus engine for the DMG/Prova permissioned ledger: block
//! and transaction validation, the administrative thread state machine, the
//! UTXO view with reorg-safe apply/undo, and chain selection.
//!
//! ## Architecture
//!
//! The crate is a passive validation library. Networking, RPC, persistent
//! storage, the mempool policy layer and the script interpreter are external
//! collaborators; they feed candidate blocks to [`chain::Chain::process_block`]
//! and query its snapshots. A single writer owns the `Chain` value; any
//! number of readers may query the best view behind the caller's lock.
//!
//! ## Design principles
//!
//! 1. **Classified failures**: every rule violation surfaces as one stable
//!    [`error::ConsensusError`] kind and leaves chain state untouched.
//! 2. **Journaled state**: the UTXO and key views record undo data for every
//!    connected block; disconnect is a total inverse of connect.
//! 3. **Explicit parameters**: all validation receives a
//!    [`params::ChainParams`] handle; there are no process-wide singletons.
//!
//! ## Usage
//!
//! ```
//! use prova_consensus::chain::Chain;
//! use prova_consensus::mediantime::FixedTimeSource;
//! use prova_consensus::params::regression_net_params;
//!
//! let params = regression_net_params();
//! let genesis_time = params.genesis_block.header.timestamp;
//! let chain = Chain::new(params, Box::new(FixedTimeSource(genesis_time)));
//! assert_eq!(chain.best_height(), 0);
//! assert_eq!(chain.total_supply(), 0);
//! ```

pub mod block;
pub mod chain;
pub mod constants;
pub mod error;
pub mod keyview;
pub mod mediantime;
pub mod merkle;
pub mod mining;
pub mod params;
pub mod pow;
pub mod ratelimit;
pub mod script;
pub mod scriptval;
pub mod transaction;
pub mod types;
pub mod utxoview;
pub mod wire;

pub use chain::{BlockAcceptance, Chain};
pub use error::{ConsensusError, Result};
pub use types::{Amount, Block, BlockHeader, Hash, KeyId, OutPoint, ThreadId, Transaction};
