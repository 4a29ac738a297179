// SPDX-License-Identifier: MPL-2.0

//! Shared helpers for integration tests

#![allow(dead_code)]

use camera_session::backends::camera::simulated::SimulatedBackend;
use camera_session::session::ForegroundObserver;
use camera_session::{
    CameraDeviceManager, CameraId, GraphListener, GraphRequestProcessor, GraphStateError,
    SessionConfig,
};
use std::sync::{Arc, Mutex};

/// One recorded listener callback
#[derive(Debug, Clone, PartialEq)]
pub enum GraphCallback {
    Started(uuid::Uuid),
    /// Whether a processor was passed along
    Stopped(bool),
    Modified,
    Error(GraphStateError),
}

/// Graph listener that records every callback in order
#[derive(Debug, Default)]
pub struct RecordingGraphListener {
    callbacks: Mutex<Vec<GraphCallback>>,
}

impl RecordingGraphListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn callbacks(&self) -> Vec<GraphCallback> {
        self.callbacks.lock().unwrap().clone()
    }

    pub fn started(&self) -> usize {
        self.count(|c| matches!(c, GraphCallback::Started(_)))
    }

    pub fn stopped(&self) -> usize {
        self.count(|c| matches!(c, GraphCallback::Stopped(_)))
    }

    pub fn modified(&self) -> usize {
        self.count(|c| matches!(c, GraphCallback::Modified))
    }

    pub fn errors(&self) -> Vec<GraphStateError> {
        self.callbacks()
            .into_iter()
            .filter_map(|c| match c {
                GraphCallback::Error(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn count(&self, f: impl Fn(&GraphCallback) -> bool) -> usize {
        self.callbacks.lock().unwrap().iter().filter(|c| f(c)).count()
    }

    fn record(&self, callback: GraphCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }
}

impl GraphListener for RecordingGraphListener {
    fn on_graph_started(&self, request_processor: GraphRequestProcessor) {
        self.record(GraphCallback::Started(request_processor.session_id()));
    }

    fn on_graph_stopped(&self, request_processor: Option<GraphRequestProcessor>) {
        self.record(GraphCallback::Stopped(request_processor.is_some()));
    }

    fn on_graph_modified(&self, _request_processor: GraphRequestProcessor) {
        self.record(GraphCallback::Modified);
    }

    fn on_graph_error(&self, graph_state_error: GraphStateError) {
        self.record(GraphCallback::Error(graph_state_error));
    }
}

pub fn id(value: &str) -> CameraId {
    CameraId::from(value)
}

pub fn foreground() -> ForegroundObserver {
    Arc::new(|| true)
}

/// A manager with default configuration over `backend`
pub fn manager(backend: &SimulatedBackend) -> CameraDeviceManager {
    camera_session::logging::init();
    CameraDeviceManager::new(Arc::new(backend.clone()), &SessionConfig::default())
}
