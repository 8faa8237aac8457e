//! The root of the Bitcoin-inherited transaction Merkle tree.

use std::{fmt, io};

use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

use super::hash::{parse_reversed_hex, write_reversed_hex};

/// The root of the transaction Merkle tree, binding the header to the
/// block's transactions.
///
/// This core never recomputes the tree (transaction validation is the full
/// node's job); the root is carried as an opaque 32-byte field with the same
/// display convention as a block hash.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Root(pub [u8; 32]);

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_reversed_hex(&self.0, f)
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "merkle::Root({})", self)
    }
}

impl BitcoinSerialize for Root {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Root {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        <[u8; 32]>::bitcoin_deserialize(reader).map(Root)
    }
}

impl std::str::FromStr for Root {
    type Err = SerializationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_reversed_hex(s).map(Root)
    }
}
