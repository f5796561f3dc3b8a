//! Compact target encoding and block work
//!
//! The header's 32-bit `bits` field encodes a 256-bit target as an
//! (exponent, 24-bit mantissa) pair with a sign bit. The header hash must
//! not exceed the decoded target. There is no difficulty competition on this
//! chain, but the encoding stays bit-exact with the lineage so headers hash
//! and compare identically.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::error::{ConsensusError, Result};
use crate::types::{BlockHeader, Hash};

/// Expand a compact representation into the full target.
///
/// The representation is sign ‖ exponent ‖ 24-bit mantissa, interpreted as
/// `mantissa * 256^(exponent-3)`.
pub fn compact_to_big(compact: u32) -> BigUint {
    let mantissa = compact & 0x007f_ffff;
    let is_negative = compact & 0x0080_0000 != 0;
    let exponent = (compact >> 24) as u32;

    // Negative targets never validate anything; treat them as zero so every
    // hash compares above them.
    if is_negative {
        return BigUint::zero();
    }

    if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    }
}

/// Compress a big integer target back into compact form.
pub fn big_to_compact(value: &BigUint) -> u32 {
    if value.is_zero() {
        return 0;
    }
    let bytes = value.to_bytes_be();
    let mut exponent = bytes.len() as u32;
    let mut mantissa: u32 = 0;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        mantissa |= (*byte as u32) << (8 * (2 - i));
    }
    // The mantissa sign bit must stay clear; shift right and bump the
    // exponent when the leading byte would set it.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    (exponent << 24) | mantissa
}

/// Interpret a little-endian hash as a big integer for target comparison.
pub fn hash_to_big(hash: &Hash) -> BigUint {
    let mut be = *hash;
    be.reverse();
    BigUint::from_bytes_be(&be)
}

/// Per-block work: 2^256 / (target + 1).
pub fn calc_work(bits: u32) -> BigUint {
    let target = compact_to_big(bits);
    if target.is_zero() {
        return BigUint::zero();
    }
    let numerator: BigUint = BigUint::one() << 256usize;
    numerator / (target + BigUint::one())
}

/// Check that the header hash satisfies its claimed target.
pub fn check_header_target(header: &BlockHeader, pow_limit_bits: u32) -> Result<()> {
    let target = compact_to_big(header.bits);
    if target.is_zero() {
        return Err(ConsensusError::BadDifficulty(format!(
            "bits {:#010x} decode to a zero or negative target",
            header.bits
        )));
    }
    if target > compact_to_big(pow_limit_bits) {
        return Err(ConsensusError::BadDifficulty(format!(
            "bits {:#010x} decode above the limit {:#010x}",
            header.bits, pow_limit_bits
        )));
    }
    let hash = header.block_hash();
    if hash_to_big(&hash) > target {
        return Err(ConsensusError::HighHash(format!(
            "block hash {} above target for bits {:#010x}",
            crate::types::hash_to_string(&hash),
            header.bits
        )));
    }
    Ok(())
}
