use std::io::Cursor;

use chrono::{DateTime, Utc};

use crate::cached::Cached;
use crate::parameters::NEOSCRYPT_ACTIVATION_TIME;
use crate::serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError};
use crate::work::difficulty::CompactDifficulty;
use crate::work::neoscrypt;
use serde::{Deserialize, Serialize};

use super::{merkle, Hash, Height, PowHash};

/// A block header, containing metadata about a block.
///
/// Headers are chained together via the backwards reference (previous
/// header hash), each pointing to its parent all the way back to the
/// genesis block. This core stores and verifies headers alone; the block
/// bodies never leave the full nodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// The block's version field.
    pub version: u32,

    /// The hash of the previous block, used to create a chain of blocks back
    /// to the genesis block.
    ///
    /// This ensures no previous block can be changed without also changing
    /// this block's header.
    pub previous_block_hash: Hash,

    /// The root of the Bitcoin-inherited transaction Merkle tree, binding the
    /// block header to the transactions in the block.
    pub merkle_root: merkle::Root,

    /// The block timestamp is a Unix epoch time (UTC) when the miner started
    /// hashing the header (according to the miner).
    ///
    /// Also the selector for the proof-of-work algorithm: headers stamped at
    /// or after the NeoScrypt activation time are NeoScrypt-mined.
    pub time: DateTime<Utc>,

    /// An encoded version of the target threshold this block's header hash
    /// must not exceed, in the same nBits format used by Bitcoin.
    pub difficulty_threshold: CompactDifficulty,

    /// An arbitrary field that miners change to produce a proof-of-work hash
    /// below the target threshold.
    pub nonce: u32,

    /// The chain position this header was received at.
    ///
    /// Derived from context (headers do not carry their height on the wire),
    /// so it is not part of the consensus serialization.
    pub height: Height,

    /// For efficiency, the identity hash is computed once while parsing and
    /// cached here. Not part of the consensus serialization.
    hash: Cached<Hash>,
}

impl Header {
    /// Returns length of a serialized header in bytes
    pub const fn len() -> usize {
        80
    }

    pub fn new(
        version: u32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: DateTime<Utc>,
        difficulty_threshold: CompactDifficulty,
        nonce: u32,
        height: Height,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            height,
            hash: Cached::new(),
        }
    }

    /// Parses a raw 80-byte header received at chain position `height`.
    ///
    /// Hashes the input up front, so the identity hash of a parsed header is
    /// free; this matters when verifying 2016-header chunks.
    pub fn parse(src: &[u8], height: Height) -> Result<Self, SerializationError> {
        if src.len() != Header::len() {
            return Err(SerializationError::Parse("header must be exactly 80 bytes"));
        }
        let own_hash = Hash(sha256d::digest(src));

        let mut src = Cursor::new(src);
        Ok(Header {
            version: u32::bitcoin_deserialize(&mut src)?,
            previous_block_hash: Hash::bitcoin_deserialize(&mut src)?,
            merkle_root: merkle::Root::bitcoin_deserialize(&mut src)?,
            time: <DateTime<Utc>>::bitcoin_deserialize(&mut src)?,
            difficulty_threshold: CompactDifficulty::bitcoin_deserialize(&mut src)?,
            nonce: u32::bitcoin_deserialize(&mut src)?,
            height,
            hash: Cached::from(own_hash),
        })
    }

    /// The identity hash of this header: SHA-256d of the 80-byte
    /// serialization, for every header regardless of mining era.
    pub fn hash(&self) -> Hash {
        match self.hash.value() {
            Some(hash) => hash,
            None => Hash::from(self),
        }
    }

    /// The proof-of-work hash of this header: SHA-256d before the NeoScrypt
    /// activation timestamp, NeoScrypt from it onwards.
    pub fn pow_hash(&self) -> PowHash {
        let data = self
            .bitcoin_serialize_to_vec()
            .expect("serializing to a Vec is infallible");
        if self.time.timestamp() < NEOSCRYPT_ACTIVATION_TIME {
            PowHash(sha256d::digest(&data))
        } else {
            PowHash(neoscrypt::hash(&data))
        }
    }
}

impl BitcoinSerialize for Header {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.version.bitcoin_serialize(&mut target)?;
        self.previous_block_hash.bitcoin_serialize(&mut target)?;
        self.merkle_root.bitcoin_serialize(&mut target)?;
        self.time.bitcoin_serialize(&mut target)?;
        self.difficulty_threshold.bitcoin_serialize(&mut target)?;
        self.nonce.bitcoin_serialize(&mut target)?;
        Ok(())
    }
}
