// SPDX-License-Identifier: GPL-3.0-only

//! Graph listener interface
//!
//! The session layer reports the lifecycle of a bound camera to the component
//! that owns the capture graph through [`GraphListener`].

use crate::backends::camera::{CameraId, DeviceState, GraphStateError};
use tokio::sync::watch;

/// Handle to the device session a graph is bound to
///
/// Handed to [`GraphListener::on_graph_started`] and friends. It stays usable
/// after the session closes; [`GraphRequestProcessor::is_open`] then reports
/// `false`.
#[derive(Debug, Clone)]
pub struct GraphRequestProcessor {
    camera_id: CameraId,
    session_id: uuid::Uuid,
    device_state: watch::Receiver<DeviceState>,
}

impl GraphRequestProcessor {
    pub(crate) fn new(
        camera_id: CameraId,
        session_id: uuid::Uuid,
        device_state: watch::Receiver<DeviceState>,
    ) -> Self {
        Self {
            camera_id,
            session_id,
            device_state,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Identifier of the underlying device session
    ///
    /// Two processors with the same session id refer to the same opened
    /// device.
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn device_state(&self) -> DeviceState {
        *self.device_state.borrow()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.device_state(), DeviceState::Open { .. })
    }
}

/// Receiver of graph lifecycle callbacks
///
/// Callbacks for one binding are delivered in order and never concurrently.
/// A listener may call back into the binding that notified it.
pub trait GraphListener: Send + Sync {
    /// The bound device is open and ready for requests
    fn on_graph_started(&self, request_processor: GraphRequestProcessor);

    /// The binding is finished; `None` if it never started
    fn on_graph_stopped(&self, request_processor: Option<GraphRequestProcessor>);

    /// The bound device session was reconfigured
    fn on_graph_modified(&self, request_processor: GraphRequestProcessor);

    fn on_graph_error(&self, graph_state_error: GraphStateError);
}

/// Listener that ignores every callback (used for prewarming)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpGraphListener;

impl GraphListener for NoOpGraphListener {
    fn on_graph_started(&self, _request_processor: GraphRequestProcessor) {}

    fn on_graph_stopped(&self, _request_processor: Option<GraphRequestProcessor>) {}

    fn on_graph_modified(&self, _request_processor: GraphRequestProcessor) {}

    fn on_graph_error(&self, _graph_state_error: GraphStateError) {}
}
