//! Chain parameters
//!
//! Every validator receives an explicit `ChainParams` handle; there is no
//! process-wide network singleton. The regression network embeds the
//! well-known keys its tests sign with, the way regression networks do.

use std::collections::{HashMap, HashSet};

use secp256k1::{PublicKey, Secp256k1, SecretKey};

use crate::constants::{COINBASE_MATURITY, MAX_PREV_OUT_INDEX};
use crate::keyview::KeySetType;
use crate::merkle::calc_merkle_root;
use crate::script::prova_thread_script;
use crate::types::{
    Amount, Block, BlockHeader, Hash, KeyId, OutPoint, ThreadId, Transaction, TxIn, TxOut,
    ZERO_HASH,
};

/// Well-known regression-network key scalars. The corresponding public keys
/// seed the root and validate sets and the initial ASP map.
pub const REG_TEST_PRIV_KEY_1: [u8; 32] = [
    0x2b, 0x8c, 0x52, 0xb7, 0x7b, 0x32, 0x7c, 0x75, 0x5b, 0x9b, 0x37, 0x55, 0x00, 0xd3, 0xf4,
    0xb2, 0xda, 0x9b, 0x0a, 0x1f, 0xf6, 0x5f, 0x68, 0x91, 0xd3, 0x11, 0xfe, 0x94, 0x29, 0x5b,
    0xc2, 0x6a,
];
pub const REG_TEST_PRIV_KEY_2: [u8; 32] = [
    0xea, 0xf0, 0x2c, 0xa3, 0x48, 0xc5, 0x24, 0xe6, 0x39, 0x26, 0x55, 0xba, 0x4d, 0x29, 0x60,
    0x3c, 0xd1, 0xa7, 0x34, 0x7d, 0x9d, 0x65, 0xcf, 0xe9, 0x3c, 0xe1, 0xeb, 0xff, 0xdc, 0xa2,
    0x26, 0x94,
];
pub const REG_TEST_PRIV_KEY_3: [u8; 32] = [
    0x64, 0x89, 0xdd, 0x3e, 0x30, 0x88, 0xc2, 0xc4, 0xd6, 0xbc, 0x44, 0x4e, 0x4c, 0x47, 0xf9,
    0x2c, 0x9b, 0xf2, 0x8d, 0x89, 0x65, 0x1a, 0x9e, 0x22, 0x0d, 0xbc, 0x2c, 0x0d, 0x11, 0x81,
    0xc5, 0xe4,
];
/// The regression validate key; block headers in tests are signed with it.
pub const REG_TEST_VALIDATE_PRIV_KEY: [u8; 32] = [
    0x40, 0x15, 0x28, 0x9a, 0x22, 0x86, 0x58, 0x04, 0x75, 0x20, 0xf0, 0xd0, 0xab, 0xe7, 0xad,
    0x49, 0xab, 0xc7, 0x7f, 0x6b, 0xe0, 0xbe, 0x63, 0xb3, 0x6b, 0x94, 0xb8, 0x3c, 0x2d, 0x1f,
    0xd9, 0x77,
];

// Initial issue and provision key material (compressed form).
const REG_TEST_ISSUE_KEYS: [&str; 2] = [
    "038364914c537fc6c6a675166aea88abf7a2c83b0955b2e6b0611dacfad6242288",
    "0353cc1a8e6fcb764349bce68a56a285316bcea950a6f667fee4c95d5ad2f72815",
];
const REG_TEST_PROVISION_KEYS: [&str; 2] = [
    "0324d2903ef1c4f0df2d47cd39184e667bd32d101a319c47ed47a4941f62a1b886",
    "025ceeba2ab4a635df2c0301a3d773da06ac5a18a7c3e0d09a795d7e57d233edf1",
];

/// Parameters defining one Prova network.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub name: &'static str,
    /// The least-difficult target the chain accepts; also the expected
    /// `bits` of every block (no retargeting on this chain).
    pub pow_limit_bits: u32,
    pub coinbase_maturity: u32,
    pub genesis_block: Block,
    /// Admin key sets in effect at genesis.
    pub admin_key_sets: HashMap<KeySetType, HashSet<PublicKey>>,
    /// ASP key ids mapped at genesis.
    pub asp_key_ids: HashMap<KeyId, PublicKey>,
}

impl ChainParams {
    pub fn genesis_hash(&self) -> Hash {
        self.genesis_block.block_hash()
    }

    /// The highest key id mapped at genesis.
    pub fn initial_last_key_id(&self) -> KeyId {
        self.asp_key_ids.keys().copied().max().unwrap_or(0)
    }

    /// Outpoint of an admin thread's genesis continuation output.
    pub fn genesis_thread_outpoint(&self, thread: ThreadId) -> OutPoint {
        OutPoint::new(self.genesis_block.transactions[0].hash(), thread as u32)
    }
}

/// The block subsidy at the given height. The entire supply of this chain is
/// issued through the issue thread, so the subsidy is zero everywhere and the
/// coinbase collects fees only.
pub fn calc_block_subsidy(_height: u32, _params: &ChainParams) -> Amount {
    0
}

fn parse_pub_key(hex_key: &str) -> PublicKey {
    let bytes = hex::decode(hex_key).expect("well-known key constant is valid hex");
    PublicKey::from_slice(&bytes).expect("well-known key constant is on the curve")
}

fn pub_key_for(secret: &[u8; 32]) -> PublicKey {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret).expect("well-known scalar is in range");
    PublicKey::from_secret_key(&secp, &sk)
}

/// Build the genesis block: a single origin transaction whose outputs 0, 1
/// and 2 are the root, provision and issue thread continuation outputs.
fn build_genesis_block(pow_limit_bits: u32) -> Block {
    let origin_tx = Transaction::new(
        1,
        vec![TxIn {
            prev_out: OutPoint::new(ZERO_HASH, MAX_PREV_OUT_INDEX),
            sig_script: b"/prova/".to_vec(),
            sequence: 0xffff_ffff,
        }],
        ThreadId::ALL
            .iter()
            .map(|thread| TxOut {
                value: 0,
                pk_script: prova_thread_script(*thread),
            })
            .collect(),
        0,
    );
    let mut block = Block {
        header: BlockHeader {
            version: 1,
            prev_block: ZERO_HASH,
            merkle_root: calc_merkle_root(std::slice::from_ref(&origin_tx)),
            timestamp: 1_486_467_380,
            bits: pow_limit_bits,
            height: 0,
            size: 0,
            nonce: 0,
            validator_sig: Vec::new(),
        },
        transactions: vec![origin_tx],
    };
    block.header.size = block.base_size() as u32;
    block
}

/// Regression network parameters. The target limit accepts roughly every
/// second hash so blocks solve instantly in tests.
pub fn regression_net_params() -> ChainParams {
    let pow_limit_bits = 0x207f_ffff;

    let root_keys: HashSet<PublicKey> = [
        pub_key_for(&REG_TEST_PRIV_KEY_1),
        pub_key_for(&REG_TEST_PRIV_KEY_2),
    ]
    .into_iter()
    .collect();
    let issue_keys: HashSet<PublicKey> = REG_TEST_ISSUE_KEYS.iter().map(|k| parse_pub_key(k)).collect();
    let provision_keys: HashSet<PublicKey> = REG_TEST_PROVISION_KEYS
        .iter()
        .map(|k| parse_pub_key(k))
        .collect();
    let validate_keys: HashSet<PublicKey> =
        [pub_key_for(&REG_TEST_VALIDATE_PRIV_KEY)].into_iter().collect();

    let mut admin_key_sets = HashMap::new();
    admin_key_sets.insert(KeySetType::Root, root_keys);
    admin_key_sets.insert(KeySetType::Issue, issue_keys);
    admin_key_sets.insert(KeySetType::Provision, provision_keys);
    admin_key_sets.insert(KeySetType::Validate, validate_keys);

    let mut asp_key_ids = HashMap::new();
    asp_key_ids.insert(1, pub_key_for(&REG_TEST_PRIV_KEY_1));
    asp_key_ids.insert(2, pub_key_for(&REG_TEST_PRIV_KEY_2));

    ChainParams {
        name: "regtest",
        pow_limit_bits,
        coinbase_maturity: COINBASE_MATURITY,
        genesis_block: build_genesis_block(pow_limit_bits),
        admin_key_sets,
        asp_key_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{script_class, ScriptClass};

    #[test]
    fn test_genesis_thread_outputs() {
        let params = regression_net_params();
        let origin = &params.genesis_block.transactions[0];
        assert_eq!(origin.outputs.len(), 3);
        for thread in ThreadId::ALL {
            let out = &origin.outputs[thread as usize];
            assert_eq!(out.value, 0);
            assert_eq!(script_class(&out.pk_script), ScriptClass::ProvaAdmin);
            assert_eq!(
                params.genesis_thread_outpoint(thread).index,
                thread as u32
            );
        }
    }

    #[test]
    fn test_genesis_merkle_root_matches() {
        let params = regression_net_params();
        let block = &params.genesis_block;
        assert_eq!(
            block.header.merkle_root,
            calc_merkle_root(&block.transactions)
        );
        assert_eq!(block.header.size as usize, block.serialize_size());
    }

    #[test]
    fn test_initial_key_state() {
        let params = regression_net_params();
        assert_eq!(params.initial_last_key_id(), 2);
        assert_eq!(params.admin_key_sets[&KeySetType::Root].len(), 2);
        assert_eq!(params.admin_key_sets[&KeySetType::Issue].len(), 2);
        assert_eq!(params.admin_key_sets[&KeySetType::Provision].len(), 2);
        assert_eq!(params.admin_key_sets[&KeySetType::Validate].len(), 1);
    }

    #[test]
    fn test_subsidy_is_zero() {
        let params = regression_net_params();
        assert_eq!(calc_block_subsidy(0, &params), 0);
        assert_eq!(calc_block_subsidy(210_000, &params), 0);
    }
}
