// SPDX-License-Identifier: GPL-3.0-only

//! Routing of asynchronous hardware errors
//!
//! Backends report errors by camera id. The request loop registers which
//! virtual camera currently owns each id, so an error can reach the right
//! binding even though the backend knows nothing about bindings.

use super::virtual_camera::VirtualCameraState;
use crate::backends::camera::{CameraError, CameraId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info};

#[derive(Default)]
pub struct CameraErrorProcessor {
    active: Mutex<HashMap<CameraId, Weak<VirtualCameraState>>>,
}

impl CameraErrorProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CameraId, Weak<VirtualCameraState>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `virtual_camera` as the owner of `camera_id`
    pub fn set_active_virtual_camera(
        &self,
        camera_id: &CameraId,
        virtual_camera: &Arc<VirtualCameraState>,
    ) {
        debug!(camera = %camera_id, binding = %virtual_camera.id(), "Registering active virtual camera");
        self.lock()
            .insert(camera_id.clone(), Arc::downgrade(virtual_camera));
    }

    /// Forget the owner of `camera_id`
    pub fn clear_active_virtual_camera(&self, camera_id: &CameraId) {
        self.lock().remove(camera_id);
    }

    /// Deliver a hardware error for `camera_id`
    ///
    /// Errors the device will recover from are reported to the listener;
    /// anything else disconnects the owning binding. Returns false when no
    /// live binding owns the camera.
    pub fn on_camera_error(
        &self,
        camera_id: &CameraId,
        error: CameraError,
        will_attempt_retry: bool,
    ) -> bool {
        let owner = self.lock().get(camera_id).and_then(Weak::upgrade);
        let Some(virtual_camera) = owner else {
            info!(camera = %camera_id, error = %error, "Dropping error for camera without an active binding");
            return false;
        };

        if will_attempt_retry {
            virtual_camera.report_error(error);
        } else {
            virtual_camera.disconnect_with(Some(error));
        }
        true
    }
}

impl std::fmt::Debug for CameraErrorProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraErrorProcessor")
            .field("active", &self.lock().len())
            .finish()
    }
}
