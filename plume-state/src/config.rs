//! Configuration for the header store.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the header store.
///
/// The wider wallet owns configuration loading; this struct is the handle
/// it passes down.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The directory holding the main chain file and the `forks`
    /// subdirectory.
    pub headers_dir: PathBuf,
}

impl Config {
    pub(crate) fn forks_dir(&self) -> PathBuf {
        self.headers_dir.join("forks")
    }
}

impl Default for Config {
    fn default() -> Self {
        let headers_dir = dirs::data_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
            .join("plume");

        Self { headers_dir }
    }
}
