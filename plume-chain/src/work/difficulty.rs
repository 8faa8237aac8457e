//! Block difficulty data structures and calculations.
//!
//! The difficulty "target threshold" is a 256-bit number a header's
//! proof-of-work hash must not exceed. On the wire and in the header it is
//! carried in the compact 32-bit `bits` encoding: one size byte and a
//! three-byte mantissa.

use std::cmp::Ordering;
use std::{fmt, io};

use primitive_types::U256;
use thiserror::Error;

use crate::block::PowHash;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// A rejected compact difficulty encoding.
///
/// The consensus rules accept a narrower range than the raw 32-bit field
/// can express; anything outside it is an encoding error, not merely an
/// easy target.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BitsError {
    /// The size byte of the compact encoding is outside `[0x03, 0x1e]`.
    #[error("compact difficulty size byte {0:#04x} outside [0x03, 0x1e]")]
    SizeOutOfRange(u32),
    /// The mantissa of the compact encoding is outside `[0x8000, 0x7fffff]`.
    #[error("compact difficulty mantissa {0:#08x} outside [0x8000, 0x7fffff]")]
    MantissaOutOfRange(u32),
}

lazy_static::lazy_static! {
    /// The highest target of the SHA-256d era, reached by the genesis block.
    pub static ref MAX_TARGET: ExpandedDifficulty = ExpandedDifficulty(U256::from_big_endian(
        &hex::decode("00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
            .expect("hard-coded target parses"),
    ));

    /// The highest target of the NeoScrypt era, anchoring the difficulty
    /// reset at the fourth hard fork.
    pub static ref MAX_TARGET_NEOSCRYPT: ExpandedDifficulty = ExpandedDifficulty(U256::from_big_endian(
        &hex::decode("0000003fffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
            .expect("hard-coded target parses"),
    ));
}

/// A difficulty threshold in the compact nBits format used by Bitcoin.
///
/// For a header at height `height`, this field MUST equal the expected
/// target for that height, re-encoded.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct CompactDifficulty(pub u32);

/// A 256-bit difficulty target, decompressed from [`CompactDifficulty`].
///
/// Comparisons are u256 integer comparisons, like bitcoind: greater values
/// represent *less* work.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExpandedDifficulty(pub(crate) U256);

impl CompactDifficulty {
    /// Decodes to the full 256-bit target.
    ///
    /// The size byte must lie in `[0x03, 0x1e]` and the mantissa in
    /// `[0x8000, 0x7fffff]`; the target is `mantissa << 8 * (size - 3)`.
    pub fn to_expanded(self) -> Result<ExpandedDifficulty, BitsError> {
        let size = (self.0 >> 24) & 0xff;
        if !(0x03..=0x1e).contains(&size) {
            return Err(BitsError::SizeOutOfRange(size));
        }
        let mantissa = self.0 & 0x00ff_ffff;
        if !(0x8000..=0x007f_ffff).contains(&mantissa) {
            return Err(BitsError::MantissaOutOfRange(mantissa));
        }
        Ok(ExpandedDifficulty(U256::from(mantissa) << (8 * (size - 3))))
    }
}

impl ExpandedDifficulty {
    /// The all-zero target.
    ///
    /// Used as a sentinel where no proof-of-work check may run (testnet and
    /// the checkpointed prefix): any real hash exceeds it, so an
    /// unintentional check fails loudly.
    pub fn zero() -> ExpandedDifficulty {
        ExpandedDifficulty(U256::zero())
    }

    /// Re-encodes to the compact format.
    ///
    /// Strips leading zero bytes from the big-endian representation down to
    /// a three-byte mantissa, then shifts one byte back out when the top
    /// mantissa byte has its high bit set (the mantissa is signed in
    /// bitcoind's original encoding).
    pub fn to_compact(self) -> CompactDifficulty {
        let mut be_bytes = [0u8; 32];
        self.0.to_big_endian(&mut be_bytes);

        let mut start = 0;
        while start < 29 && be_bytes[start] == 0 {
            start += 1;
        }
        let mut size = (32 - start) as u32;
        let mut mantissa = u32::from(be_bytes[start]) << 16
            | u32::from(be_bytes[start + 1]) << 8
            | u32::from(be_bytes[start + 2]);
        if mantissa >= 0x0080_0000 {
            mantissa >>= 8;
            size += 1;
        }
        CompactDifficulty(size << 24 | mantissa)
    }
}

impl fmt::Debug for CompactDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("CompactDifficulty")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

impl fmt::Debug for ExpandedDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut be_bytes = [0u8; 32];
        self.0.to_big_endian(&mut be_bytes);
        f.debug_tuple("ExpandedDifficulty")
            .field(&hex::encode(&be_bytes))
            .finish()
    }
}

impl BitcoinSerialize for CompactDifficulty {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for CompactDifficulty {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        Ok(CompactDifficulty(u32::bitcoin_deserialize(reader)?))
    }
}

impl From<&PowHash> for ExpandedDifficulty {
    /// A proof-of-work hash reinterpreted as a 256-bit integer, for
    /// comparison against a target.
    ///
    /// Hash bytes are in little-endian wire order, so the displayed
    /// (big-endian) value is the little-endian interpretation of the raw
    /// digest.
    fn from(hash: &PowHash) -> Self {
        ExpandedDifficulty(U256::from_little_endian(&hash.0))
    }
}

impl PartialEq<ExpandedDifficulty> for PowHash {
    fn eq(&self, other: &ExpandedDifficulty) -> bool {
        ExpandedDifficulty::from(self) == *other
    }
}

impl PartialOrd<ExpandedDifficulty> for PowHash {
    fn partial_cmp(&self, other: &ExpandedDifficulty) -> Option<Ordering> {
        ExpandedDifficulty::from(self).partial_cmp(other)
    }
}
