use std::{fmt, io};

use crate::serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError};
#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

use super::Header;

/// Writes a 32-byte hash field in display order.
///
/// Hash fields live in little-endian byte order on the wire and in the
/// header files, but are displayed as u256 big-endian numbers, following
/// the convention set by Bitcoin. Shared by every hash-like field in this
/// module.
pub(super) fn write_reversed_hex(bytes: &[u8; 32], f: &mut fmt::Formatter) -> fmt::Result {
    for byte in bytes.iter().rev() {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// Parses a display-order hex string back into wire-order bytes.
pub(super) fn parse_reversed_hex(s: &str) -> Result<[u8; 32], SerializationError> {
    let decoded =
        hex::decode(s).map_err(|_| SerializationError::Parse("hash is not valid hex"))?;
    if decoded.len() != 32 {
        return Err(SerializationError::Parse("hash must be 64 hex digits"));
    }
    let mut bytes = [0u8; 32];
    for (slot, byte) in bytes.iter_mut().zip(decoded.iter().rev()) {
        *slot = *byte;
    }
    Ok(bytes)
}

/// A hash of a block header, used to identify headers and link them into a
/// chain. ⛓️
///
/// This is always the SHA-256d hash of the 80-byte header serialization,
/// whatever hash the proof of work uses; linkage and equality never depend
/// on the mining algorithm.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash(pub [u8; 32]);

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_reversed_hex(&self.0, f)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "block::Hash({})", self)
    }
}

impl BitcoinSerialize for Hash {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Hash {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        <[u8; 32]>::bitcoin_deserialize(reader).map(Hash)
    }
}

impl<'a> From<&'a Header> for Hash {
    fn from(header: &'a Header) -> Self {
        let data = header
            .bitcoin_serialize_to_vec()
            .expect("serializing to a Vec is infallible");
        Hash(sha256d::digest(&data))
    }
}

impl std::str::FromStr for Hash {
    type Err = SerializationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_reversed_hex(s).map(Hash)
    }
}

/// The proof-of-work digest of a block header.
///
/// Distinct from [`Hash`]: before the NeoScrypt activation timestamp the two
/// coincide (both SHA-256d), afterwards the proof of work is NeoScrypt while
/// identity and linkage stay SHA-256d. A `PowHash` is only ever compared
/// against a difficulty target.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PowHash(pub [u8; 32]);

impl fmt::Display for PowHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_reversed_hex(&self.0, f)
    }
}

impl fmt::Debug for PowHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "block::PowHash({})", self)
    }
}
