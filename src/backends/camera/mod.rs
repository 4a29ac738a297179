// SPDX-License-Identifier: GPL-3.0-only

//! Camera hardware abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ CameraDeviceManager │  ← Request loop, open/close arbitration
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ RetryingCameraOpener│  ← Permission check, retry/backoff
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  CameraBackend Trait│  ← Hardware interface
//! └──────────┬──────────┘
//!            │
//!            ▼
//!   ┌─────────────────┐
//!   │ SimulatedBackend│  ← Scripted implementation for tests
//!   └─────────────────┘
//! ```

pub mod device_state;
pub mod simulated;
pub mod types;

pub use device_state::{DeviceStateReporter, OpenedDevice};
pub use types::*;

use futures::future::BoxFuture;

/// Hardware camera backend
///
/// Backends open devices and report their lifecycle through the
/// [`DeviceStateReporter`] handed to [`CameraBackend::open_camera`].
pub trait CameraBackend: Send + Sync {
    /// Check whether the process currently holds camera permission
    fn has_camera_permission(&self) -> bool;

    /// Perform a single open attempt
    ///
    /// Retrying is the caller's job. The reporter stays valid for the lifetime
    /// of the returned device and is how the backend signals disconnects,
    /// asynchronous errors and reconfiguration.
    ///
    /// # Returns
    /// * `Ok(device)` - The device is open
    /// * `Err(CameraError)` - This attempt failed
    fn open_camera(
        &self,
        camera_id: &CameraId,
        reporter: DeviceStateReporter,
    ) -> BoxFuture<'_, Result<Box<dyn CameraDevice>, CameraError>>;
}

/// One opened hardware camera session
pub trait CameraDevice: Send + Sync {
    fn camera_id(&self) -> &CameraId;

    /// Tear the session down
    ///
    /// Resolves once the hardware reports the device fully closed.
    fn close(&self) -> BoxFuture<'_, ()>;
}
