//! Persistent, branch-aware storage for the Feathercoin header chain.
//!
//! The chain lives in append-only flat files of 80-byte records: one main
//! file rooted at genesis, plus one file per alternate branch rooted at a
//! fork point. [`Chains`] owns the set of branches, dispatches incoming
//! headers and 2016-header chunks to whichever branch can extend, and
//! promotes a branch over its parent the moment it outgrows it.
//!
//! One network thread is expected to feed headers in; any number of reader
//! threads may query concurrently.

mod branch;
mod chains;
mod config;
mod error;
mod flat_file;

pub use chains::Chains;
pub use config::Config;
pub use error::ValidateError;
