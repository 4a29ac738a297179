// SPDX-License-Identifier: GPL-3.0-only

//! Scripted camera backend
//!
//! Used by the test suites to drive the session layer without hardware:
//! open outcomes can be scripted per camera, opens can be held at a gate, and
//! every opened device exposes a [`SimulatedCameraHandle`] for injecting
//! disconnects, errors and reconfiguration.

use super::types::{CameraError, CameraId};
use super::{CameraBackend, CameraDevice, DeviceStateReporter};
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

#[derive(Default)]
struct CameraRecord {
    scripted: VecDeque<Result<(), CameraError>>,
    attempts: u32,
    opened: u32,
    closed: u32,
    open_now: u32,
    max_open: u32,
    latest: Option<SimulatedCameraHandle>,
}

struct SimulatedInner {
    permission: AtomicBool,
    cameras: Mutex<HashMap<CameraId, CameraRecord>>,
    gate: watch::Sender<bool>,
    total_attempts: watch::Sender<u32>,
    close_delay: Mutex<Duration>,
}

impl SimulatedInner {
    fn cameras(&self) -> MutexGuard<'_, HashMap<CameraId, CameraRecord>> {
        self.cameras.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_record<R>(&self, camera_id: &CameraId, f: impl FnOnce(&mut CameraRecord) -> R) -> R {
        f(self.cameras().entry(camera_id.clone()).or_default())
    }

    /// Count `camera_id` as no longer open, once per device
    fn mark_closed(&self, camera_id: &CameraId, released: &AtomicBool) {
        if released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.with_record(camera_id, |record| {
            record.open_now = record.open_now.saturating_sub(1);
        });
    }
}

/// In-memory [`CameraBackend`] with scriptable behavior
///
/// Cloning yields another handle to the same simulated hardware.
#[derive(Clone)]
pub struct SimulatedBackend {
    inner: Arc<SimulatedInner>,
}

impl SimulatedBackend {
    /// A backend with permission granted where every open succeeds
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        let (total_attempts, _) = watch::channel(0);
        Self {
            inner: Arc::new(SimulatedInner {
                permission: AtomicBool::new(true),
                cameras: Mutex::new(HashMap::new()),
                gate,
                total_attempts,
                close_delay: Mutex::new(Duration::ZERO),
            }),
        }
    }

    pub fn set_camera_permission(&self, granted: bool) {
        self.inner.permission.store(granted, Ordering::SeqCst);
    }

    /// Make the next `count` open attempts of `camera_id` fail with `error`
    pub fn fail_next_opens(&self, camera_id: &CameraId, error: CameraError, count: usize) {
        self.inner.with_record(camera_id, |record| {
            record.scripted.extend(std::iter::repeat_n(Err(error), count));
        });
    }

    /// Park every open attempt until [`SimulatedBackend::release_opens`]
    pub fn hold_opens(&self) {
        self.inner.gate.send_replace(false);
    }

    pub fn release_opens(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Delay every device close by `delay`
    pub fn set_close_delay(&self, delay: Duration) {
        *self
            .inner
            .close_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Open attempts made for `camera_id`, including failed and held ones
    pub fn open_attempts(&self, camera_id: &CameraId) -> u32 {
        self.inner.with_record(camera_id, |record| record.attempts)
    }

    /// Devices successfully opened for `camera_id`
    pub fn open_count(&self, camera_id: &CameraId) -> u32 {
        self.inner.with_record(camera_id, |record| record.opened)
    }

    /// Devices of `camera_id` closed through [`CameraDevice::close`]
    pub fn close_count(&self, camera_id: &CameraId) -> u32 {
        self.inner.with_record(camera_id, |record| record.closed)
    }

    /// Whether a device for `camera_id` is currently open
    pub fn is_open(&self, camera_id: &CameraId) -> bool {
        self.inner.with_record(camera_id, |record| record.open_now > 0)
    }

    /// Highest number of simultaneously open devices ever seen for `camera_id`
    pub fn max_concurrent_opens(&self, camera_id: &CameraId) -> u32 {
        self.inner.with_record(camera_id, |record| record.max_open)
    }

    /// Handle to the most recently opened device of `camera_id`
    pub fn device(&self, camera_id: &CameraId) -> Option<SimulatedCameraHandle> {
        self.inner
            .with_record(camera_id, |record| record.latest.clone())
    }

    /// Wait until at least `count` open attempts were made across all cameras
    pub async fn wait_for_open_attempts(&self, count: u32) {
        let mut rx = self.inner.total_attempts.subscribe();
        let _ = rx.wait_for(|attempts| *attempts >= count).await;
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for SimulatedBackend {
    fn has_camera_permission(&self) -> bool {
        self.inner.permission.load(Ordering::SeqCst)
    }

    fn open_camera(
        &self,
        camera_id: &CameraId,
        reporter: DeviceStateReporter,
    ) -> BoxFuture<'_, Result<Box<dyn CameraDevice>, CameraError>> {
        let camera_id = camera_id.clone();
        Box::pin(async move {
            let inner = &self.inner;
            inner.with_record(&camera_id, |record| record.attempts += 1);
            inner.total_attempts.send_modify(|attempts| *attempts += 1);

            let mut gate = inner.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;

            let outcome = inner.with_record(&camera_id, |record| {
                record.scripted.pop_front().unwrap_or(Ok(()))
            });
            if let Err(error) = outcome {
                debug!(camera = %camera_id, error = %error, "Simulated open failure");
                return Err(error);
            }

            let released = Arc::new(AtomicBool::new(false));
            let handle = SimulatedCameraHandle {
                reporter,
                inner: Arc::clone(inner),
                released: Arc::clone(&released),
            };
            inner.with_record(&camera_id, |record| {
                record.opened += 1;
                record.open_now += 1;
                record.max_open = record.max_open.max(record.open_now);
                record.latest = Some(handle.clone());
            });
            debug!(camera = %camera_id, "Simulated device opened");

            Ok(Box::new(SimulatedDevice {
                camera_id,
                inner: Arc::clone(inner),
                released,
                closed: AtomicBool::new(false),
            }) as Box<dyn CameraDevice>)
        })
    }
}

impl std::fmt::Debug for SimulatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBackend")
            .field("permission", &self.has_camera_permission())
            .field("cameras", &self.inner.cameras().len())
            .finish()
    }
}

struct SimulatedDevice {
    camera_id: CameraId,
    inner: Arc<SimulatedInner>,
    released: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl CameraDevice for SimulatedDevice {
    fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let delay = *self
                .inner
                .close_delay
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.inner.mark_closed(&self.camera_id, &self.released);
                self.inner
                    .with_record(&self.camera_id, |record| record.closed += 1);
            }
        })
    }
}

/// Test-side handle to one simulated device
#[derive(Clone)]
pub struct SimulatedCameraHandle {
    reporter: DeviceStateReporter,
    inner: Arc<SimulatedInner>,
    released: Arc<AtomicBool>,
}

impl SimulatedCameraHandle {
    pub fn camera_id(&self) -> &CameraId {
        self.reporter.camera_id()
    }

    /// Unplug the device
    pub fn simulate_disconnect(&self) {
        self.inner
            .mark_closed(self.reporter.camera_id(), &self.released);
        self.reporter.report_closed(Some(CameraError::Disconnected));
    }

    /// Raise an asynchronous device error
    pub fn simulate_error(&self, error: CameraError, will_attempt_retry: bool) {
        self.reporter.report_error(error, will_attempt_retry);
    }

    /// Rebuild the capture session on the open device
    pub fn simulate_reconfigured(&self) {
        self.reporter.report_reconfigured();
    }
}

impl std::fmt::Debug for SimulatedCameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedCameraHandle")
            .field("reporter", &self.reporter)
            .finish()
    }
}
