//! Block generation rate limiting
//!
//! A validate key must not sign every block in the recent window; diversity
//! of signers is enforced at generation time, not at validation time.

use secp256k1::PublicKey;

/// Whether the proposed key is rate limited given the signers of recent
/// blocks, most recent first.
///
/// The key is limited iff it signed all of the most recent `max_blocks`
/// blocks. A shorter chain never limits, so the first block after genesis is
/// always eligible.
pub fn is_generation_share_rate_limited(
    pub_key: &PublicKey,
    recent_signers: &[PublicKey],
    max_blocks: usize,
) -> bool {
    if max_blocks == 0 || recent_signers.len() < max_blocks {
        return false;
    }
    recent_signers[..max_blocks].iter().all(|key| key == pub_key)
}
