// SPDX-License-Identifier: GPL-3.0-only

//! Camera session management
//!
//! Clients talk to a [`CameraDeviceManager`], which hands out
//! [`VirtualCamera`]s and serializes all device work on one request loop.

mod active_camera;
pub mod error_processor;
pub mod graph;
pub mod manager;
pub mod opener;
mod request;
pub mod virtual_camera;
pub mod wake_lock;

pub use error_processor::CameraErrorProcessor;
pub use graph::{GraphListener, GraphRequestProcessor, NoOpGraphListener};
pub use manager::{ActiveCameraSummary, CameraDeviceManager, ManagerSnapshot};
pub use opener::{RetryPolicy, RetryingCameraOpener};
pub use request::ForegroundObserver;
pub use virtual_camera::{VirtualCamera, VirtualCameraState, VirtualCameraStatus};
pub use wake_lock::{WakeLock, WakeLockToken};
