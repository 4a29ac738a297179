// SPDX-License-Identifier: GPL-3.0-only

//! Device state channel shared between a backend and the session layer
//!
//! Each open attempt gets a fresh `watch` channel. The backend holds the
//! [`DeviceStateReporter`] side and the session layer wraps a successful open
//! in an [`OpenedDevice`], which drives teardown and lets anyone await it.

use super::types::{CameraError, CameraId, DeviceState};
use super::CameraDevice;
use crate::session::error_processor::CameraErrorProcessor;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Backend-side handle for publishing device lifecycle changes
#[derive(Clone)]
pub struct DeviceStateReporter {
    camera_id: CameraId,
    state: Arc<watch::Sender<DeviceState>>,
    error_processor: Arc<CameraErrorProcessor>,
}

impl DeviceStateReporter {
    pub(crate) fn new(camera_id: CameraId, error_processor: Arc<CameraErrorProcessor>) -> Self {
        let (state, _) = watch::channel(DeviceState::Opening);
        Self {
            camera_id,
            state: Arc::new(state),
            error_processor,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Current device state
    pub fn state(&self) -> DeviceState {
        *self.state.borrow()
    }

    /// The capture session on the open device was rebuilt
    pub fn report_reconfigured(&self) {
        self.state.send_if_modified(|state| match state {
            DeviceState::Open { revision } => {
                *revision = revision.wrapping_add(1);
                true
            }
            _ => false,
        });
    }

    /// The device started shutting down on its own
    pub fn report_closing(&self) {
        self.state.send_if_modified(|state| {
            if state.is_closing_or_closed() {
                return false;
            }
            *state = DeviceState::Closing;
            true
        });
    }

    /// The device is gone (disconnect, eviction, fatal error)
    pub fn report_closed(&self, error: Option<CameraError>) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            *state = DeviceState::Closed { error };
            true
        });
        if changed {
            debug!(camera = %self.camera_id, ?error, "Device reported closed");
        }
    }

    /// Route an asynchronous hardware error to whichever binding owns this camera
    pub fn report_error(&self, error: CameraError, will_attempt_retry: bool) {
        warn!(camera = %self.camera_id, error = %error, will_attempt_retry, "Device error");
        self.error_processor
            .on_camera_error(&self.camera_id, error, will_attempt_retry);
    }

    fn mark_open(&self) {
        self.state.send_if_modified(|state| {
            if *state != DeviceState::Opening {
                return false;
            }
            *state = DeviceState::Open { revision: 0 };
            true
        });
    }
}

impl std::fmt::Debug for DeviceStateReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStateReporter")
            .field("camera_id", &self.camera_id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// A successfully opened hardware device together with its state channel
pub struct OpenedDevice {
    camera_id: CameraId,
    device: Arc<dyn CameraDevice>,
    reporter: DeviceStateReporter,
}

impl OpenedDevice {
    pub(crate) fn new(device: Box<dyn CameraDevice>, reporter: DeviceStateReporter) -> Self {
        reporter.mark_open();
        Self {
            camera_id: reporter.camera_id.clone(),
            device: Arc::from(device),
            reporter,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn state(&self) -> DeviceState {
        self.reporter.state()
    }

    /// Subscribe to device state changes
    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.reporter.state.subscribe()
    }

    /// Close the device
    ///
    /// Only the first caller drives the hardware teardown; later callers just
    /// wait for it.
    pub async fn close(&self) {
        let started = self.reporter.state.send_if_modified(|state| {
            if state.is_closing_or_closed() {
                return false;
            }
            *state = DeviceState::Closing;
            true
        });

        if started {
            debug!(camera = %self.camera_id, "Closing device");
            self.device.close().await;
            self.reporter.report_closed(None);
        } else {
            self.await_closed().await;
        }
    }

    /// Wait until the device reports fully closed
    pub async fn await_closed(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(DeviceState::is_closed).await;
    }
}

impl std::fmt::Debug for OpenedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedDevice")
            .field("camera_id", &self.camera_id)
            .field("state", &self.state())
            .finish()
    }
}
