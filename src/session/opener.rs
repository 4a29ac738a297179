// SPDX-License-Identifier: GPL-3.0-only

//! Device opener with retry and backoff

use super::error_processor::CameraErrorProcessor;
use super::request::ForegroundObserver;
use crate::backends::camera::{
    CameraBackend, CameraError, CameraId, DeviceStateReporter, OpenedDevice,
};
use crate::constants::retry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Retry behavior for device opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of open attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for a single delay, in milliseconds
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// No retry is started once this much time has passed since the first attempt
    pub max_elapsed_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            max_delay_ms: retry::MAX_DELAY_MS,
            backoff_multiplier: retry::BACKOFF_MULTIPLIER,
            max_elapsed_ms: retry::MAX_ELAPSED_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-indexed)
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay_ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let clamped = delay_ms.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(clamped)
    }

    /// Decide whether to try again after `error`
    ///
    /// # Arguments
    /// * `error` - Error of the last attempt
    /// * `attempts` - Attempts made so far (1 after the first failure)
    /// * `elapsed` - Time since the first attempt started
    /// * `is_foreground` - Whether the requesting client is in the foreground
    pub fn should_retry(
        &self,
        error: CameraError,
        attempts: u32,
        elapsed: Duration,
        is_foreground: &dyn Fn() -> bool,
    ) -> bool {
        if attempts >= self.max_attempts || elapsed >= Duration::from_millis(self.max_elapsed_ms) {
            return false;
        }
        match error {
            CameraError::PermissionDenied => false,
            // Disabled cameras come back when the app returns to the foreground
            CameraError::Disabled => is_foreground(),
            CameraError::IllegalArgument => attempts < 2,
            _ => error.is_retryable(),
        }
    }
}

/// Opens devices through a [`CameraBackend`], retrying transient failures
pub struct RetryingCameraOpener {
    backend: Arc<dyn CameraBackend>,
    error_processor: Arc<CameraErrorProcessor>,
    policy: RetryPolicy,
}

impl RetryingCameraOpener {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        error_processor: Arc<CameraErrorProcessor>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            error_processor,
            policy,
        }
    }

    /// Open `camera_id`, retrying according to the policy
    ///
    /// Missing permission fails immediately with
    /// [`CameraError::PermissionDenied`]. Otherwise the last attempt's error is
    /// returned once the policy gives up.
    pub async fn open_camera_with_retry(
        &self,
        camera_id: &CameraId,
        is_foreground: &ForegroundObserver,
    ) -> Result<OpenedDevice, CameraError> {
        if !self.backend.has_camera_permission() {
            warn!(camera = %camera_id, "Missing camera permission");
            return Err(CameraError::PermissionDenied);
        }

        debug!(camera = %camera_id, "Opening camera with retries");
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let reporter =
                DeviceStateReporter::new(camera_id.clone(), Arc::clone(&self.error_processor));

            match self.backend.open_camera(camera_id, reporter.clone()).await {
                Ok(device) => {
                    info!(
                        camera = %camera_id,
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Camera opened"
                    );
                    return Ok(OpenedDevice::new(device, reporter));
                }
                Err(error) => {
                    let retry = self.policy.should_retry(
                        error,
                        attempts,
                        start.elapsed(),
                        is_foreground.as_ref(),
                    );
                    if !retry {
                        warn!(camera = %camera_id, error = %error, attempts, "Giving up opening camera");
                        return Err(error);
                    }

                    let delay = self.policy.delay_for_attempt(attempts - 1);
                    debug!(
                        camera = %camera_id,
                        error = %error,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying camera open"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryingCameraOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingCameraOpener")
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::simulated::SimulatedBackend;
    use crate::backends::camera::DeviceState;

    fn opener(backend: &SimulatedBackend) -> RetryingCameraOpener {
        RetryingCameraOpener::new(
            Arc::new(backend.clone()),
            Arc::new(CameraErrorProcessor::new()),
            RetryPolicy::default(),
        )
    }

    fn foreground(value: bool) -> ForegroundObserver {
        Arc::new(move || value)
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        // 100 * 2^5 = 3200 → clamped to 2000
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(2000));
    }

    #[test]
    fn test_retry_decisions() {
        let policy = RetryPolicy::default();
        let yes = || true;
        let no = || false;
        let zero = Duration::ZERO;

        assert!(policy.should_retry(CameraError::InUse, 1, zero, &no));
        assert!(!policy.should_retry(CameraError::PermissionDenied, 1, zero, &yes));
        assert!(policy.should_retry(CameraError::Disabled, 1, zero, &yes));
        assert!(!policy.should_retry(CameraError::Disabled, 1, zero, &no));
        assert!(policy.should_retry(CameraError::IllegalArgument, 1, zero, &yes));
        assert!(!policy.should_retry(CameraError::IllegalArgument, 2, zero, &yes));
        assert!(!policy.should_retry(CameraError::InUse, policy.max_attempts, zero, &yes));
        assert!(!policy.should_retry(
            CameraError::InUse,
            1,
            Duration::from_millis(policy.max_elapsed_ms),
            &yes
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let backend = SimulatedBackend::new();
        let id = CameraId::from("0");
        backend.fail_next_opens(&id, CameraError::InUse, 3);

        let device = opener(&backend)
            .open_camera_with_retry(&id, &foreground(true))
            .await
            .expect("open succeeds after retries");

        assert_eq!(backend.open_attempts(&id), 4);
        assert_eq!(device.state(), DeviceState::Open { revision: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let backend = SimulatedBackend::new();
        let id = CameraId::from("0");
        backend.fail_next_opens(&id, CameraError::Device, 100);

        let result = opener(&backend)
            .open_camera_with_retry(&id, &foreground(true))
            .await;

        assert_eq!(result.err(), Some(CameraError::Device));
        assert_eq!(backend.open_attempts(&id), RetryPolicy::default().max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_disabled_is_not_retried() {
        let backend = SimulatedBackend::new();
        let id = CameraId::from("0");
        backend.fail_next_opens(&id, CameraError::Disabled, 1);

        let result = opener(&backend)
            .open_camera_with_retry(&id, &foreground(false))
            .await;

        assert_eq!(result.err(), Some(CameraError::Disabled));
        assert_eq!(backend.open_attempts(&id), 1);
    }

    #[tokio::test]
    async fn test_missing_permission_is_fatal() {
        let backend = SimulatedBackend::new();
        backend.set_camera_permission(false);
        let id = CameraId::from("0");

        let result = opener(&backend)
            .open_camera_with_retry(&id, &foreground(true))
            .await;

        assert_eq!(result.err(), Some(CameraError::PermissionDenied));
        assert_eq!(backend.open_attempts(&id), 0);
    }
}
