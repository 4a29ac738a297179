// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{paths, queue};
use crate::errors::{ConfigError, ConfigResult};
use crate::session::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Session manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the request mailbox
    pub request_queue_depth: usize,
    /// Device open retry policy
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_queue_depth: queue::REQUEST_QUEUE_DEPTH,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the configuration file at `path`
    pub fn load(path: &Path) -> ConfigResult<Self> {
        debug!(path = %path.display(), "Loading session config");
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Load the user's configuration file, falling back to defaults
    ///
    /// A missing file is not an error. A file that cannot be read or parsed is
    /// logged and ignored.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring invalid session config");
                Self::default()
            }
        }
    }

    /// `<config dir>/camera-session/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(paths::CONFIG_DIR_NAME).join(paths::CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.request_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "request_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = SessionConfig::from_json(r#"{ "retry": { "max_attempts": 3 } }"#).unwrap();

        assert_eq!(config.request_queue_depth, queue::REQUEST_QUEUE_DEPTH);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
    }

    #[test]
    fn test_zero_queue_depth_is_rejected() {
        let result = SessionConfig::from_json(r#"{ "request_queue_depth": 0 }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let result = SessionConfig::from_json("{ request_queue_depth: ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = SessionConfig::load(Path::new("/nonexistent/camera-session/config.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
