//! Miscellaneous test code for the plume workspace.

use std::sync::Once;

pub mod prelude {
    //! The types test functions lean on, in one import.
    pub use color_eyre::eyre::{bail, ensure, eyre, Report, Result};
}

static INIT: Once = Once::new();

/// Initialize global test context: a tracing subscriber printing to the
/// test output, and color-eyre panic/error reports.
///
/// Every test calls this first; repeated calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            )
            .with_test_writer()
            .try_init();

        let _ = color_eyre::install();
    });
}
