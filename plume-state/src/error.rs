use std::io;

use thiserror::Error;

use plume_chain::block::{Hash, Height, PowHash};
use plume_chain::work::difficulty::{CompactDifficulty, ExpandedDifficulty};
use plume_chain::work::retarget::TargetError;
use plume_chain::SerializationError;

/// A consensus or storage failure while handling an incoming header.
///
/// The connect entry points catch these, log them, and report plain
/// rejection to the network layer; nothing is persisted for a header that
/// produced one.
#[derive(Error, Debug)]
pub enum ValidateError {
    /// The header does not link to the stored chain.
    #[error("previous hash mismatch at height {height}: expected {expected}, header links {found}")]
    LinkBroken {
        height: Height,
        expected: Hash,
        found: Hash,
    },

    /// The header's `bits` field disagrees with the expected target.
    #[error("bits mismatch at height {height}: expected {expected:?}, header carries {found:?}")]
    BitsMismatch {
        height: Height,
        expected: CompactDifficulty,
        found: CompactDifficulty,
    },

    /// The proof-of-work hash exceeds the target.
    #[error("insufficient proof of work at height {height}: {hash} exceeds {target:?}")]
    InsufficientPow {
        height: Height,
        hash: PowHash,
        target: ExpandedDifficulty,
    },

    /// A height this operation depends on is not stored on any reachable
    /// branch.
    #[error("no header stored at height {0}")]
    MissingHeader(Height),

    /// A chunk that is not a whole number of 80-byte records.
    #[error("chunk length {0} is not a multiple of the 80-byte record size")]
    RaggedChunk(usize),

    /// No branch is rooted at the named checkpoint.
    #[error("no branch rooted at checkpoint {0}")]
    UnknownBranch(u32),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
