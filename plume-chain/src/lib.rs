//! Consensus-critical data structures and arithmetic for the Feathercoin
//! header chain.
//!
//! This crate owns everything that must be bit-exact with the network:
//! the 80-byte block header codec, the identity and proof-of-work hashes,
//! the compact `bits` encoding of 256-bit targets, and the retarget
//! algorithms of the chain's four difficulty eras. It performs no I/O;
//! persistent storage lives in `plume-state`.

#![allow(clippy::unit_arg)]

pub mod block;
mod cached;
pub mod parameters;
pub mod serialization;
pub mod work;

pub use serialization::{
    BitcoinDeserialize, BitcoinDeserializeInto, BitcoinSerialize, SerializationError,
};
