//! Expected-target computation across the chain's difficulty eras.
//!
//! Four regimes are live on mainnet, switched by height: the vanilla
//! Bitcoin 2016-block retarget, a 504-block interval (fork one), a
//! 126-block interval averaging a short and a long window (fork two), and
//! per-block retargeting over three windows (fork three, "eHRC"). The
//! arithmetic is consensus-critical: multiplications and divisions happen
//! in exactly the order written here, because intermediate truncation is
//! part of the rules.

use primitive_types::{U256, U512};
use thiserror::Error;

use crate::block::{Header, Height};
use crate::parameters::{
    NetworkParams, HEIGHT_FORK_FOUR, HEIGHT_FORK_ONE, HEIGHT_FORK_THREE, HEIGHT_FORK_TWO,
    SEVEN_DAYS,
};

use super::difficulty::{BitsError, ExpandedDifficulty, MAX_TARGET, MAX_TARGET_NEOSCRYPT};

/// The classic retarget interval, in blocks.
const VANILLA_INTERVAL: u32 = 2016;
/// Fork-one retarget interval.
const FORK_ONE_INTERVAL: u32 = 504;
/// Fork-two retarget interval.
const FORK_TWO_INTERVAL: u32 = 126;

/// A failure while computing the expected target for a height.
#[derive(Error, Debug)]
pub enum TargetError {
    #[error(transparent)]
    Bits(#[from] BitsError),

    /// A retarget window reached back to a header the chain cannot supply.
    #[error("no header available at height {0:?} for retargeting")]
    MissingHeader(Height),

    /// Reading chain history failed.
    #[error("io error reading chain history: {0}")]
    Io(#[from] std::io::Error),
}

/// Read access to historical headers during target computation.
///
/// Retarget windows may reach up to 480 blocks behind the header being
/// verified. During chunk verification the store satisfies in-window
/// lookups from the chunk held in memory and everything older from disk;
/// single-header connection reads from disk alone.
pub trait HeaderLookup {
    fn header_at(&self, height: Height) -> Result<Header, TargetError>;
}

/// Computes the target a header at `height` must encode in its `bits`
/// field and beat with its proof-of-work hash.
pub fn expected_target(
    params: &NetworkParams,
    height: Height,
    chain: &dyn HeaderLookup,
) -> Result<ExpandedDifficulty, TargetError> {
    if params.testnet {
        return Ok(ExpandedDifficulty::zero());
    }
    if height == Height(0) {
        return Ok(*MAX_TARGET);
    }
    let checkpointed = params.checkpointed_height();
    if height < checkpointed {
        // pessimistic sentinel: the checkpointed prefix is trusted, and an
        // unintentional check against it must fail
        return Ok(ExpandedDifficulty::zero());
    }
    if height == checkpointed {
        return Ok(params.post_checkpoint_target);
    }
    if height == HEIGHT_FORK_FOUR {
        return Ok(*MAX_TARGET_NEOSCRYPT);
    }
    if height >= HEIGHT_FORK_THREE {
        fork_three_target(height, chain)
    } else if height >= HEIGHT_FORK_TWO {
        fork_two_target(height, chain)
    } else if height >= HEIGHT_FORK_ONE {
        fork_one_target(height, chain)
    } else {
        vanilla_target(height, chain)
    }
}

/// Seconds elapsed between two headers. May be negative: timestamps are
/// miner-supplied.
fn timespan(last: &Header, first: &Header) -> i64 {
    last.time.timestamp() - first.time.timestamp()
}

/// `(actual + 3 * target) / 4`, flooring like the consensus arithmetic.
fn damp(actual_timespan: i64, target_timespan: i64) -> i64 {
    (actual_timespan + 3 * target_timespan).div_euclid(4)
}

/// The common clamp-and-scale step shared by all eras.
///
/// Clamps the measured timespan into `[target * num / den, target * den /
/// num]`, then scales the previous target by `actual / target_timespan`
/// with truncating division, capped at [`struct@MAX_TARGET`].
fn retarget(
    target: ExpandedDifficulty,
    actual_timespan: i64,
    target_timespan: i64,
    numerator: i64,
    denominator: i64,
) -> ExpandedDifficulty {
    let actual_timespan = actual_timespan.max(target_timespan * numerator / denominator);
    let actual_timespan = actual_timespan.min(target_timespan * denominator / numerator);

    // widen: the product can carry past 256 bits before the division
    let scaled = U512::from(target.0) * U512::from(actual_timespan as u64)
        / U512::from(target_timespan as u64);
    let capped = scaled.min(U512::from(MAX_TARGET.0));

    let mut be_bytes = [0u8; 64];
    capped.to_big_endian(&mut be_bytes);
    ExpandedDifficulty(U256::from_big_endian(&be_bytes[32..]))
}

/// Height < 33000: Bitcoin-style retarget every 2016 blocks, timespan
/// bounded to a factor of four.
fn vanilla_target(
    height: Height,
    chain: &dyn HeaderLookup,
) -> Result<ExpandedDifficulty, TargetError> {
    let last_height = height - 1;
    let last = chain.header_at(last_height)?;
    let target = last.difficulty_threshold.to_expanded()?;
    if height.0 % VANILLA_INTERVAL != 0 {
        return Ok(target);
    }
    let first = chain.header_at(Height(last_height.0.saturating_sub(VANILLA_INTERVAL)))?;
    Ok(retarget(
        target,
        timespan(&last, &first),
        SEVEN_DAYS / 2,
        1,
        4,
    ))
}

/// 33000 ≤ height < 87948: 504-block interval, timespan bounded to
/// 70/99ths either way.
fn fork_one_target(
    height: Height,
    chain: &dyn HeaderLookup,
) -> Result<ExpandedDifficulty, TargetError> {
    let last_height = height - 1;
    let last = chain.header_at(last_height)?;
    let target = last.difficulty_threshold.to_expanded()?;
    if height.0 % FORK_ONE_INTERVAL != 0 && height != HEIGHT_FORK_ONE {
        return Ok(target);
    }
    let first = chain.header_at(last_height - FORK_ONE_INTERVAL)?;
    Ok(retarget(
        target,
        timespan(&last, &first),
        SEVEN_DAYS / 8,
        70,
        99,
    ))
}

/// 87948 ≤ height < 204639: 126-block interval; the measured timespan is
/// the mean of a one-interval window and a four-interval window, damped
/// toward the target timespan.
fn fork_two_target(
    height: Height,
    chain: &dyn HeaderLookup,
) -> Result<ExpandedDifficulty, TargetError> {
    let last_height = height - 1;
    let last = chain.header_at(last_height)?;
    let target = last.difficulty_threshold.to_expanded()?;
    if height.0 % FORK_TWO_INTERVAL != 0 && height != HEIGHT_FORK_TWO {
        return Ok(target);
    }
    let first = chain.header_at(last_height - FORK_TWO_INTERVAL)?;
    let short_timespan = timespan(&last, &first);
    let first = chain.header_at(last_height - FORK_TWO_INTERVAL * 4)?;
    let long_timespan = timespan(&last, &first).div_euclid(4);

    let target_timespan = SEVEN_DAYS / 32;
    let actual_timespan = damp(
        (short_timespan + long_timespan).div_euclid(2),
        target_timespan,
    );
    Ok(retarget(target, actual_timespan, target_timespan, 453, 494))
}

/// Height ≥ 204639: every block retargets, averaging per-block rates over
/// 15-, 120- and 480-block windows, damped toward one block a minute.
fn fork_three_target(
    height: Height,
    chain: &dyn HeaderLookup,
) -> Result<ExpandedDifficulty, TargetError> {
    let last_height = height - 1;
    let last = chain.header_at(last_height)?;
    let target = last.difficulty_threshold.to_expanded()?;

    let first = chain.header_at(last_height - 15)?;
    let short_rate = timespan(&last, &first).div_euclid(15);
    let first = chain.header_at(last_height - 120)?;
    let medium_rate = timespan(&last, &first).div_euclid(120);
    let first = chain.header_at(last_height - 480)?;
    let long_rate = timespan(&last, &first).div_euclid(480);

    let target_timespan = 60;
    let actual_timespan = damp(
        (short_rate + medium_rate + long_rate).div_euclid(3),
        target_timespan,
    );
    Ok(retarget(target, actual_timespan, target_timespan, 453, 494))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{merkle, Hash};
    use crate::parameters::GENESIS_PREVIOUS_BLOCK_HASH;
    use crate::work::difficulty::CompactDifficulty;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    /// A vec-backed chain for exercising the era arithmetic.
    struct FlatChain(BTreeMap<u32, Header>);

    impl FlatChain {
        fn new() -> FlatChain {
            FlatChain(BTreeMap::new())
        }

        fn insert(&mut self, height: u32, time: i64, bits: u32) {
            let header = Header::new(
                1,
                GENESIS_PREVIOUS_BLOCK_HASH,
                merkle::Root([0; 32]),
                Utc.timestamp(time, 0),
                CompactDifficulty(bits),
                0,
                Height(height),
            );
            self.0.insert(height, header);
        }
    }

    impl HeaderLookup for FlatChain {
        fn header_at(&self, height: Height) -> Result<Header, TargetError> {
            self.0
                .get(&height.0)
                .copied()
                .ok_or(TargetError::MissingHeader(height))
        }
    }

    fn params() -> NetworkParams {
        NetworkParams {
            testnet: false,
            genesis_hash: Hash([0; 32]),
            checkpoints: Vec::new(),
            post_checkpoint_target: ExpandedDifficulty::zero(),
        }
    }

    #[test]
    fn testnet_skips_target_computation() {
        let mut params = params();
        params.testnet = true;
        let chain = FlatChain::new();
        let target = expected_target(&params, Height(100), &chain).expect("no lookup needed");
        assert_eq!(target, ExpandedDifficulty::zero());
    }

    #[test]
    fn genesis_gets_maximum_target() {
        let chain = FlatChain::new();
        let target = expected_target(&params(), Height(0), &chain).expect("no lookup needed");
        assert_eq!(target, *MAX_TARGET);
    }

    #[test]
    fn checkpointed_region_is_sentinel_zero() {
        let params = params().with_checkpoints(vec![Hash([0; 32]); 2]);
        let chain = FlatChain::new();
        let target = expected_target(&params, Height(1), &chain).expect("no lookup needed");
        assert_eq!(target, ExpandedDifficulty::zero());
    }

    #[test]
    fn checkpoint_boundary_uses_configured_anchor() {
        let anchor = CompactDifficulty(0x1c00ffff).to_expanded().unwrap();
        let mut params = params().with_checkpoints(vec![Hash([0; 32]); 2]);
        params.post_checkpoint_target = anchor;
        let chain = FlatChain::new();
        let target =
            expected_target(&params, Height(2 * 2016), &chain).expect("no lookup needed");
        assert_eq!(target, anchor);
    }

    #[test]
    fn fork_four_resets_to_neoscrypt_maximum() {
        let chain = FlatChain::new();
        let target =
            expected_target(&params(), HEIGHT_FORK_FOUR, &chain).expect("no lookup needed");
        assert_eq!(target, *MAX_TARGET_NEOSCRYPT);
    }

    #[test]
    fn vanilla_carries_target_between_boundaries() {
        let mut chain = FlatChain::new();
        chain.insert(99, 1_000_000, 0x1d00ffff);
        let target = expected_target(&params(), Height(100), &chain).expect("lookup succeeds");
        assert_eq!(target.to_compact(), CompactDifficulty(0x1d00ffff));
    }

    /// A 2016 boundary with the actual timespan exactly on target leaves
    /// the target unchanged.
    #[test]
    fn vanilla_on_schedule_keeps_target() {
        let mut chain = FlatChain::new();
        let span = SEVEN_DAYS / 2;
        chain.insert(0, 1_000_000, 0x1d00ffff);
        chain.insert(2015, 1_000_000 + span, 0x1d00ffff);
        let target = expected_target(&params(), Height(2016), &chain).expect("lookup succeeds");
        assert_eq!(target.to_compact(), CompactDifficulty(0x1d00ffff));
    }

    /// A stalled chain (huge actual timespan) is clamped to a factor of
    /// four, so the new target is exactly four times the old one.
    #[test]
    fn vanilla_clamps_to_factor_four() {
        let mut chain = FlatChain::new();
        let bits = 0x1c00ffff;
        chain.insert(0, 1_000_000, bits);
        chain.insert(2015, 1_000_000 + SEVEN_DAYS * 100, bits);
        let target = expected_target(&params(), Height(2016), &chain).expect("lookup succeeds");

        let old = CompactDifficulty(bits).to_expanded().unwrap();
        let four_times = ExpandedDifficulty(old.0 * U256::from(4u64));
        assert_eq!(target, four_times);
    }

    /// The factor-four cap never pushes past the era maximum.
    #[test]
    fn vanilla_never_exceeds_maximum_target() {
        let mut chain = FlatChain::new();
        // genesis-difficulty bits: quadrupling would pass MAX_TARGET
        let bits = MAX_TARGET.to_compact().0;
        chain.insert(0, 1_000_000, bits);
        chain.insert(2015, 1_000_000 + SEVEN_DAYS * 100, bits);
        let target = expected_target(&params(), Height(2016), &chain).expect("lookup succeeds");
        assert_eq!(target, *MAX_TARGET);
    }

    #[test]
    fn fork_one_retargets_at_activation() {
        let mut chain = FlatChain::new();
        let span = SEVEN_DAYS / 8;
        chain.insert(32_999 - 504, 1_000_000, 0x1c00ffff);
        chain.insert(32_999, 1_000_000 + span, 0x1c00ffff);
        // on-target timespan: unchanged even though 33000 % 504 != 0
        let target =
            expected_target(&params(), HEIGHT_FORK_ONE, &chain).expect("lookup succeeds");
        assert_eq!(target.to_compact(), CompactDifficulty(0x1c00ffff));
    }

    #[test]
    fn fork_one_carries_between_intervals() {
        let mut chain = FlatChain::new();
        chain.insert(33_000, 1_000_000, 0x1c00ffff);
        let target = expected_target(&params(), Height(33_001), &chain).expect("lookup succeeds");
        assert_eq!(target.to_compact(), CompactDifficulty(0x1c00ffff));
    }

    /// Fork two averages a one-interval and a four-interval window and
    /// damps the result; with every window exactly on schedule the target
    /// is unchanged.
    #[test]
    fn fork_two_on_schedule_keeps_target() {
        let mut chain = FlatChain::new();
        let boundary = 88_200; // first multiple of 126 above the fork
        let spacing = SEVEN_DAYS / 32 / 126;
        for offset in 0..=(126 * 4) {
            let height = boundary - 1 - offset;
            chain.insert(height, 2_000_000 - spacing * offset as i64, 0x1c00ffff);
        }
        let target =
            expected_target(&params(), Height(boundary), &chain).expect("lookup succeeds");
        assert_eq!(target.to_compact(), CompactDifficulty(0x1c00ffff));
    }

    /// Fork three reads all three windows on every block.
    #[test]
    fn fork_three_retargets_every_block() {
        let mut chain = FlatChain::new();
        let height = 300_000;
        for offset in 0..=480 {
            chain.insert(height - 1 - offset, 2_000_000 - 60 * offset as i64, 0x1c00ffff);
        }
        let target =
            expected_target(&params(), Height(height), &chain).expect("lookup succeeds");
        // on-schedule spacing of one block a minute: unchanged
        assert_eq!(target.to_compact(), CompactDifficulty(0x1c00ffff));

        // and a missing window is an error, not a skipped check
        let mut short_chain = FlatChain::new();
        for offset in 0..=120 {
            short_chain.insert(height - 1 - offset, 2_000_000 - 60 * offset as i64, 0x1c00ffff);
        }
        let err = expected_target(&params(), Height(height), &short_chain)
            .expect_err("480-block window cannot be satisfied");
        assert!(matches!(err, TargetError::MissingHeader(h) if h == Height(height - 481)));
    }

    /// Damping pulls a slow measured timespan three quarters of the way
    /// back toward the target before scaling.
    #[test]
    fn damp_favors_target_timespan() {
        assert_eq!(damp(100, 60), 70);
        assert_eq!(damp(60, 60), 60);
        // floors toward negative infinity, like the reference arithmetic
        assert_eq!(damp(-101, 0), -26);
    }
}
