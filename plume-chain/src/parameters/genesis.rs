//! Genesis consensus parameters.

use crate::block;

/// The previous block hash for the genesis block.
///
/// All known networks use the Bitcoin `null` value for the parent of the
/// genesis block. (In Bitcoin, `null` is `[0; 32]`.)
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash([0; 32]);

/// Returns the hash of the mainnet genesis block.
pub fn mainnet_genesis_hash() -> block::Hash {
    // feathercoind getblockhash 0
    "12a765e31ffd4059bada1e25190f6e98c99d9714d334efa41a195a7e7e04bfe2"
        .parse()
        .expect("hard-coded hash parses")
}
