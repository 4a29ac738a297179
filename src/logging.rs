// SPDX-License-Identifier: GPL-3.0-only

//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Calling this more
/// than once is harmless; only the first call installs a subscriber.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(true)
        .with_level(true)
        .try_init();
}
