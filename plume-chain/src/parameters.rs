//! Consensus parameters for the Feathercoin network.
//!
//! The chain went through four difficulty hard forks and one mining-hash
//! change; their activation points are fixed constants. Everything a host
//! wallet can vary (genesis, checkpoint list, testnet flag) travels in
//! [`NetworkParams`].

mod genesis;

pub use genesis::{mainnet_genesis_hash, GENESIS_PREVIOUS_BLOCK_HASH};

use primitive_types::U256;

use crate::block::{Hash, Height};
use crate::work::difficulty::ExpandedDifficulty;

/// The number of headers in a chunk: peers serve headers in runs of 2016
/// aligned to this boundary, which is also the classic retarget interval.
pub const CHUNK_SIZE: u32 = 2016;

/// First difficulty hard fork: 504-block retarget interval.
pub const HEIGHT_FORK_ONE: Height = Height(33_000);

/// Second difficulty hard fork: 126-block interval with a dual averaging
/// window and damping.
pub const HEIGHT_FORK_TWO: Height = Height(87_948);

/// Third difficulty hard fork: eHRC, retargeting on every block over three
/// averaging windows.
pub const HEIGHT_FORK_THREE: Height = Height(204_639);

/// Fourth hard fork: the NeoScrypt era, anchored by a one-off difficulty
/// reset at this height.
pub const HEIGHT_FORK_FOUR: Height = Height(432_000);

/// Headers stamped at or after this Unix time are NeoScrypt-mined; the
/// selector is the timestamp, not the height.
pub const NEOSCRYPT_ACTIVATION_TIME: i64 = 1_414_346_265;

pub const SEVEN_DAYS: i64 = 7 * 24 * 60 * 60;

/// BIP32 extended-key version bytes for the network.
///
/// Not consumed by the header core; carried so the constants surface
/// matches what the surrounding wallet expects from a network definition.
pub const XPUB_HEADER: u32 = 0x0488_b21e;
pub const XPRV_HEADER: u32 = 0x0488_ade4;

lazy_static::lazy_static! {
    /// The expected target for the first header above the checkpointed
    /// region on mainnet.
    ///
    /// Headers below the checkpoint list are trusted, so no target history
    /// exists to retarget from; this anchor must be refreshed whenever the
    /// shipped checkpoint list grows.
    pub static ref MAINNET_POST_CHECKPOINT_TARGET: ExpandedDifficulty =
        ExpandedDifficulty(U256::from_big_endian(
            &hex::decode("00000000015c3d00000000000000000000000000000000000000000000000000")
                .expect("hard-coded target parses"),
        ));
}

/// The consensus constants a host wallet supplies for one network.
///
/// Testnet parameter sets are built by the wallet's constants layer; only
/// mainnet ships here.
#[derive(Clone, Debug)]
pub struct NetworkParams {
    /// On testnet all proof-of-work checks are skipped.
    pub testnet: bool,

    /// The identity hash of the block at height 0.
    pub genesis_hash: Hash,

    /// The terminal hash of each trusted 2016-header chunk, in chunk order.
    ///
    /// Headers below `checkpoints.len() * 2016` are accepted on link
    /// continuity alone.
    pub checkpoints: Vec<Hash>,

    /// The expected target at the first height above the checkpointed
    /// region; see [`struct@MAINNET_POST_CHECKPOINT_TARGET`].
    pub post_checkpoint_target: ExpandedDifficulty,
}

impl NetworkParams {
    pub fn mainnet() -> NetworkParams {
        NetworkParams {
            testnet: false,
            genesis_hash: mainnet_genesis_hash(),
            checkpoints: Vec::new(),
            post_checkpoint_target: *MAINNET_POST_CHECKPOINT_TARGET,
        }
    }

    /// Replaces the trusted checkpoint list.
    pub fn with_checkpoints(mut self, checkpoints: Vec<Hash>) -> NetworkParams {
        self.checkpoints = checkpoints;
        self
    }

    /// The first height above the checkpointed region (`C` in the retarget
    /// rules): every header below it is covered by the checkpoint list.
    pub fn checkpointed_height(&self) -> Height {
        Height(self.checkpoints.len() as u32 * CHUNK_SIZE)
    }
}
