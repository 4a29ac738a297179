// SPDX-License-Identifier: GPL-3.0-only

//! Session manager constants

/// Request mailbox constants
pub mod queue {
    /// Default depth of the request mailbox
    ///
    /// A flood of open/close requests from several clients can outrun the
    /// coordinator while it is blocked on a slow open, so the mailbox is kept
    /// fairly deep.
    pub const REQUEST_QUEUE_DEPTH: usize = 64;
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Idle timeout of an active camera's wake lock, in milliseconds
    pub const ACTIVE_CAMERA_TIMEOUT_MS: u64 = 1000;

    /// Idle timeout of an active camera's wake lock
    pub const ACTIVE_CAMERA_TIMEOUT: Duration = Duration::from_millis(ACTIVE_CAMERA_TIMEOUT_MS);
}

/// Default device open retry policy
pub mod retry {
    /// Maximum number of open attempts per request
    pub const MAX_ATTEMPTS: u32 = 8;

    /// Delay before the first retry
    pub const BASE_DELAY_MS: u64 = 100;

    /// Upper bound for a single backoff delay
    pub const MAX_DELAY_MS: u64 = 2000;

    /// Backoff multiplier applied per attempt
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;

    /// Total time budget for all attempts of one open
    pub const MAX_ELAPSED_MS: u64 = 10_000;
}

/// Configuration file location
pub mod paths {
    /// Directory name under the user config dir
    pub const CONFIG_DIR_NAME: &str = "camera-session";

    /// Configuration file name
    pub const CONFIG_FILE_NAME: &str = "config.json";
}
