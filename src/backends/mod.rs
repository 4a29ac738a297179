// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera hardware
//!
//! The backend layer abstracts hardware access so the session layer can open,
//! observe and close devices without knowing how they are driven:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Session Layer                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  CameraBackend   │  │  Device state   │  │
//! │  │     (trait)      │  │    reporting    │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! │  ┌──────────────────┐                       │
//! │  │ SimulatedBackend │                       │
//! │  └──────────────────┘                       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Camera backend trait, error codes and device state

pub mod camera;
