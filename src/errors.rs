// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the session manager
//!
//! Hardware-level error codes live in [`crate::backends::camera::CameraError`];
//! the types here cover the manager's own call sites and configuration.

use std::fmt;

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type alias using ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced synchronously at the manager's call sites
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The request mailbox is at capacity
    QueueFull,
    /// The request loop has shut down
    ManagerClosed,
    /// The request is malformed (e.g. a prewarm with shared cameras)
    InvalidRequest(String),
}

/// Configuration loading errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// The configuration file could not be read
    Io(String),
    /// The configuration file is not valid JSON for [`crate::config::SessionConfig`]
    Parse(String),
    /// A value is out of range
    Invalid(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::QueueFull => write!(f, "Camera request queue is full"),
            SessionError::ManagerClosed => write!(f, "Camera device manager is closed"),
            SessionError::InvalidRequest(msg) => write!(f, "Invalid camera request: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Failed to read configuration: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Failed to parse configuration: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}
impl std::error::Error for ConfigError {}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for SessionError {
    fn from(err: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match err {
            tokio::sync::mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => SessionError::ManagerClosed,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
