// SPDX-License-Identifier: GPL-3.0-only

//! Opened camera owned by the request loop

use super::graph::GraphRequestProcessor;
use super::request::{CameraRequest, WeakRequestQueue};
use super::virtual_camera::VirtualCameraState;
use super::wake_lock::WakeLock;
use crate::backends::camera::{CameraId, DeviceState, OpenedDevice};
use crate::constants::timing;
use crate::errors::SessionError;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// An opened device plus the bookkeeping the request loop needs for it
///
/// Every active camera eventually gets a close request: its wake lock starts
/// counting down on creation, and a device that closes on its own releases
/// the lock right away. Connecting a virtual camera holds the lock until that
/// virtual camera disconnects.
pub(crate) struct ActiveCamera {
    device: OpenedDevice,
    session_id: uuid::Uuid,
    all_camera_ids: BTreeSet<CameraId>,
    current: Mutex<Option<Arc<VirtualCameraState>>>,
    wake_lock: WakeLock,
    watcher: JoinHandle<()>,
}

impl ActiveCamera {
    pub fn new(
        device: OpenedDevice,
        all_camera_ids: BTreeSet<CameraId>,
        queue: WeakRequestQueue,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ActiveCamera>| {
            let camera_id = device.camera_id().clone();

            let on_expired = weak.clone();
            let wake_lock = WakeLock::new(
                camera_id.to_string(),
                timing::ACTIVE_CAMERA_TIMEOUT,
                true,
                move || {
                    let Some(camera) = on_expired.upgrade() else {
                        return true;
                    };
                    match queue.try_send(CameraRequest::Close(camera)) {
                        Ok(()) => true,
                        // Keep the lease open and try again after another timeout
                        Err(e @ SessionError::QueueFull) => {
                            warn!(camera = %camera_id, error = %e, "Failed to submit close request");
                            false
                        }
                        // The loop is gone and closes its cameras on the way out
                        Err(e) => {
                            debug!(camera = %camera_id, error = %e, "Dropping close request");
                            true
                        }
                    }
                },
            );

            let mut device_state = device.subscribe();
            let on_closing = weak.clone();
            let watcher = tokio::spawn(async move {
                if device_state
                    .wait_for(DeviceState::is_closing_or_closed)
                    .await
                    .is_err()
                {
                    return;
                }
                if let Some(camera) = on_closing.upgrade() {
                    camera.wake_lock.release();
                }
            });

            Self {
                device,
                session_id: uuid::Uuid::new_v4(),
                all_camera_ids,
                current: Mutex::new(None),
                wake_lock,
                watcher,
            }
        })
    }

    pub fn camera_id(&self) -> &CameraId {
        self.device.camera_id()
    }

    /// This camera plus every camera it was opened together with
    pub fn all_camera_ids(&self) -> &BTreeSet<CameraId> {
        &self.all_camera_ids
    }

    pub fn request_processor(&self) -> GraphRequestProcessor {
        GraphRequestProcessor::new(
            self.camera_id().clone(),
            self.session_id,
            self.device.subscribe(),
        )
    }

    /// Attach `virtual_camera`, disconnecting whichever binding held this camera before
    pub fn connect_to(&self, virtual_camera: &Arc<VirtualCameraState>) {
        let token = self.wake_lock.acquire();
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(virtual_camera));

        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, virtual_camera) {
                debug!(camera = %self.camera_id(), binding = %previous.id(), "Replacing virtual camera");
                previous.disconnect();
            }
        }

        virtual_camera.connect(self.device.subscribe(), self.request_processor(), token);
    }

    /// Shut the wake lock and close the device
    pub async fn close(&self) {
        self.wake_lock.close();
        self.device.close().await;
    }

    pub async fn await_closed(&self) {
        self.device.await_closed().await;
    }
}

impl Drop for ActiveCamera {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

impl std::fmt::Debug for ActiveCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCamera")
            .field("camera_id", self.camera_id())
            .field("all_camera_ids", &self.all_camera_ids)
            .field("session_id", &self.session_id)
            .field("wake_lock", &self.wake_lock)
            .finish()
    }
}
