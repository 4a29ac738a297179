// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use std::fmt;
use std::sync::Arc;

/// Identifier of a physical or logical camera device
///
/// Cheap to clone; the id string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(Arc<str>);

impl CameraId {
    pub fn new(id: impl AsRef<str>) -> Self {
        CameraId(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Camera-{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(id: &str) -> Self {
        CameraId::new(id)
    }
}

impl From<String> for CameraId {
    fn from(id: String) -> Self {
        CameraId(Arc::from(id))
    }
}

/// Error codes reported by the hardware layer and the device opener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraError {
    /// The opener gave up, or the request never reached it (e.g. queue full)
    Opener,
    /// The camera is in use by another client
    InUse,
    /// Too many cameras are open system-wide
    MaxCamerasInUse,
    /// The camera was disabled by policy (usually: app is in the background)
    Disabled,
    /// The camera device hit a fatal error
    Device,
    /// The camera service hit a fatal error
    Service,
    /// The device was disconnected
    Disconnected,
    /// The backend rejected the open arguments
    IllegalArgument,
    /// The process lacks camera permission
    PermissionDenied,
    /// Anything the backend could not classify
    Undetermined,
}

impl CameraError {
    /// Whether the opener may ever retry after this error
    ///
    /// `Disabled` is only retried while the client is in the foreground and
    /// `IllegalArgument` only once; both still report `true` here.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CameraError::PermissionDenied)
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::Opener => write!(f, "Camera opener failed"),
            CameraError::InUse => write!(f, "Camera is in use"),
            CameraError::MaxCamerasInUse => write!(f, "Maximum number of cameras in use"),
            CameraError::Disabled => write!(f, "Camera is disabled"),
            CameraError::Device => write!(f, "Camera device error"),
            CameraError::Service => write!(f, "Camera service error"),
            CameraError::Disconnected => write!(f, "Camera disconnected"),
            CameraError::IllegalArgument => write!(f, "Illegal camera argument"),
            CameraError::PermissionDenied => write!(f, "Missing camera permission"),
            CameraError::Undetermined => write!(f, "Undetermined camera error"),
        }
    }
}

impl std::error::Error for CameraError {}

/// State of one opened hardware device, as published by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// The backend is still opening the device
    Opening,
    /// The device is open; `revision` increases on every reconfiguration
    Open { revision: u32 },
    /// Teardown has started
    Closing,
    /// The device is fully closed, optionally because of an error
    Closed { error: Option<CameraError> },
}

impl DeviceState {
    /// True once teardown has started or finished
    pub fn is_closing_or_closed(&self) -> bool {
        matches!(self, DeviceState::Closing | DeviceState::Closed { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, DeviceState::Closed { .. })
    }
}

/// Payload of a graph error callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStateError {
    pub camera_error: CameraError,
    /// Whether the session will try to recover on its own
    pub will_attempt_retry: bool,
}

impl GraphStateError {
    pub fn new(camera_error: CameraError, will_attempt_retry: bool) -> Self {
        Self {
            camera_error,
            will_attempt_retry,
        }
    }
}

impl fmt::Display for GraphStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (will attempt retry: {})",
            self.camera_error, self.will_attempt_retry
        )
    }
}
