//! Consensus-critical serialization.
//!
//! This module contains the `BitcoinSerialize` and `BitcoinDeserialize`
//! traits, analogs of the Serde `Serialize` and `Deserialize` traits but
//! intended for the consensus-critical wire format of a block header, with
//! implementations for the field types a header contains.

mod deserialize;
mod error;

pub mod sha256d;

use chrono::{DateTime, Utc};
pub use deserialize::{BitcoinDeserialize, BitcoinDeserializeInto};
pub use error::SerializationError;

use byteorder::{LittleEndian, WriteBytesExt};
use std::convert::TryFrom;

pub trait BitcoinSerialize {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn bitcoin_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.bitcoin_serialize(&mut data)?;
        Ok(data)
    }
}

impl BitcoinSerialize for u32 {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(*self)
    }
}

impl BitcoinSerialize for DateTime<Utc> {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        // u32 times are valid until 2106; out-of-range timestamps saturate
        // rather than wrap, so a malformed clock cannot alias a valid one.
        let time_u32 = match u32::try_from(self.timestamp()) {
            Ok(t) => t,
            Err(_) => std::u32::MAX,
        };
        target.write_u32::<LittleEndian>(time_u32)
    }
}

impl BitcoinSerialize for [u8; 32] {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl BitcoinSerialize for &[u8] {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}
