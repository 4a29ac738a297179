// SPDX-License-Identifier: MPL-2.0

//! Camera Session - serialized access to shared camera hardware
//!
//! This library arbitrates concurrent open and close requests against camera
//! devices. Clients get a [`VirtualCamera`] right away; a single request loop
//! decides which devices to open, reuse or tear down and connects virtual
//! cameras once their device is ready.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: Device manager, request loop, virtual cameras and wake locks
//! - [`backends`]: Camera backend abstraction and a simulated backend
//! - [`config`]: Session configuration handling
//! - [`constants`]: Queue, timing and retry defaults
//! - [`logging`]: Tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use camera_session::backends::camera::simulated::SimulatedBackend;
//! use camera_session::{CameraDeviceManager, CameraId, NoOpGraphListener, SessionConfig};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let manager = CameraDeviceManager::new(
//!     Arc::new(SimulatedBackend::new()),
//!     &SessionConfig::load_or_default(),
//! );
//! let camera = manager.open(
//!     CameraId::from("0"),
//!     Vec::new(),
//!     Arc::new(NoOpGraphListener),
//!     false,
//!     Arc::new(|| true),
//! );
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod session;

// Re-export commonly used types
pub use backends::camera::{CameraBackend, CameraDevice, CameraError, CameraId, GraphStateError};
pub use config::SessionConfig;
pub use errors::{ConfigError, SessionError};
pub use session::{
    CameraDeviceManager, GraphListener, GraphRequestProcessor, ManagerSnapshot,
    NoOpGraphListener, VirtualCamera, VirtualCameraStatus,
};
