// SPDX-License-Identifier: GPL-3.0-only

//! Client-facing camera bindings
//!
//! A [`VirtualCamera`] is handed out synchronously by
//! [`crate::session::CameraDeviceManager::open`] and represents the client's
//! request for a camera. The request loop later connects it to an opened
//! device; from then on it mirrors that device's lifecycle until it
//! disconnects, which is terminal.
//!
//! ```text
//! Unopened ──connect──► Connected ──device closing──► Disconnecting
//!     │                     │                              │
//!     └──────disconnect─────┴──────────────────────────────┴──► Disconnected
//! ```

use super::graph::{GraphListener, GraphRequestProcessor};
use super::wake_lock::WakeLockToken;
use crate::backends::camera::{CameraError, CameraId, DeviceState, GraphStateError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Published state of a virtual camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualCameraStatus {
    /// Waiting for the request loop
    Unopened,
    /// Attached to an open device
    Connected,
    /// The attached device is shutting down
    Disconnecting,
    /// Terminal; `error` is set when the binding ended because of a failure
    Disconnected { error: Option<CameraError> },
}

impl VirtualCameraStatus {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, VirtualCameraStatus::Disconnected { .. })
    }
}

enum GraphEvent {
    Started(GraphRequestProcessor),
    Stopped(Option<GraphRequestProcessor>),
    Modified(GraphRequestProcessor),
    Error(GraphStateError),
}

#[derive(Default)]
struct BindingState {
    closed: bool,
    started: bool,
    last_revision: u32,
    token: Option<WakeLockToken>,
    processor: Option<GraphRequestProcessor>,
    forward_task: Option<JoinHandle<()>>,
    events: VecDeque<GraphEvent>,
    dispatching: bool,
}

/// Shared state behind a [`VirtualCamera`]
///
/// The request loop, the active camera it is attached to, the error processor
/// and the client all hold references to the same state.
pub struct VirtualCameraState {
    camera_id: CameraId,
    id: uuid::Uuid,
    graph_listener: Arc<dyn GraphListener>,
    status: watch::Sender<VirtualCameraStatus>,
    inner: Mutex<BindingState>,
}

impl VirtualCameraState {
    pub(crate) fn new(camera_id: CameraId, graph_listener: Arc<dyn GraphListener>) -> Arc<Self> {
        let (status, _) = watch::channel(VirtualCameraStatus::Unopened);
        Arc::new(Self {
            camera_id,
            id: uuid::Uuid::new_v4(),
            graph_listener,
            status,
            inner: Mutex::new(BindingState::default()),
        })
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn status(&self) -> VirtualCameraStatus {
        *self.status.borrow()
    }

    pub(crate) fn is_unopened(&self) -> bool {
        self.status() == VirtualCameraStatus::Unopened
    }

    fn lock(&self) -> MutexGuard<'_, BindingState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach this binding to an opened device
    ///
    /// A binding that was already disconnected drops the token and stays
    /// disconnected.
    pub(crate) fn connect(
        self: &Arc<Self>,
        mut device_state: watch::Receiver<DeviceState>,
        processor: GraphRequestProcessor,
        token: Option<WakeLockToken>,
    ) {
        let mut inner = self.lock();
        if inner.closed || inner.processor.is_some() {
            debug_assert!(inner.closed, "{} connected twice", self.camera_id);
            return;
        }

        debug!(camera = %self.camera_id, binding = %self.id, "Connecting virtual camera");
        inner.token = token;
        inner.processor = Some(processor);

        let initial = *device_state.borrow_and_update();
        let released = self.apply_device_state(&mut inner, initial);

        if !inner.closed {
            let weak = Arc::downgrade(self);
            inner.forward_task = Some(tokio::spawn(async move {
                while device_state.changed().await.is_ok() {
                    let state = *device_state.borrow_and_update();
                    let Some(binding) = weak.upgrade() else {
                        break;
                    };
                    binding.on_device_state(state);
                    if state.is_closed() {
                        break;
                    }
                }
            }));
        }

        drop(inner);
        drop(released);
        self.dispatch();
    }

    /// Disconnect the binding; idempotent and terminal
    pub fn disconnect(&self) {
        self.disconnect_with(None);
    }

    /// Disconnect the binding because of `error`
    pub(crate) fn disconnect_with(&self, error: Option<CameraError>) {
        let released = {
            let mut inner = self.lock();
            self.finish(&mut inner, error)
        };
        drop(released);
        self.dispatch();
    }

    /// Report a recoverable error without ending the binding
    pub(crate) fn report_error(&self, error: CameraError) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner
                .events
                .push_back(GraphEvent::Error(GraphStateError::new(error, true)));
        }
        self.dispatch();
    }

    fn on_device_state(&self, state: DeviceState) {
        let released = {
            let mut inner = self.lock();
            self.apply_device_state(&mut inner, state)
        };
        drop(released);
        self.dispatch();
    }

    /// Returns the lease token if the binding just finished, so the caller can
    /// drop it outside the lock.
    fn apply_device_state(
        &self,
        inner: &mut BindingState,
        state: DeviceState,
    ) -> Option<WakeLockToken> {
        if inner.closed {
            return None;
        }
        match state {
            DeviceState::Opening => None,
            DeviceState::Open { revision } => {
                let Some(processor) = inner.processor.clone() else {
                    return None;
                };
                if !inner.started {
                    inner.started = true;
                    inner.last_revision = revision;
                    self.status.send_replace(VirtualCameraStatus::Connected);
                    inner.events.push_back(GraphEvent::Started(processor));
                } else if revision != inner.last_revision {
                    inner.last_revision = revision;
                    inner.events.push_back(GraphEvent::Modified(processor));
                }
                None
            }
            DeviceState::Closing => {
                self.status.send_replace(VirtualCameraStatus::Disconnecting);
                None
            }
            DeviceState::Closed { error } => self.finish(inner, error),
        }
    }

    fn finish(&self, inner: &mut BindingState, error: Option<CameraError>) -> Option<WakeLockToken> {
        if inner.closed {
            return None;
        }
        inner.closed = true;
        debug!(camera = %self.camera_id, binding = %self.id, ?error, "Virtual camera disconnected");
        self.status
            .send_replace(VirtualCameraStatus::Disconnected { error });

        if let Some(task) = inner.forward_task.take() {
            task.abort();
        }
        if let Some(error) = error {
            inner
                .events
                .push_back(GraphEvent::Error(GraphStateError::new(error, false)));
        }
        let processor = if inner.started {
            inner.processor.clone()
        } else {
            None
        };
        inner.events.push_back(GraphEvent::Stopped(processor));
        inner.token.take()
    }

    /// Deliver queued listener callbacks in order
    ///
    /// Whoever finds the dispatcher idle drains the queue; callers arriving
    /// meanwhile (including re-entrant calls from a listener) only enqueue.
    fn dispatch(&self) {
        let mut inner = self.lock();
        if inner.dispatching {
            return;
        }
        inner.dispatching = true;
        while let Some(event) = inner.events.pop_front() {
            drop(inner);
            self.deliver(event);
            inner = self.lock();
        }
        inner.dispatching = false;
    }

    fn deliver(&self, event: GraphEvent) {
        match event {
            GraphEvent::Started(processor) => self.graph_listener.on_graph_started(processor),
            GraphEvent::Stopped(processor) => self.graph_listener.on_graph_stopped(processor),
            GraphEvent::Modified(processor) => self.graph_listener.on_graph_modified(processor),
            GraphEvent::Error(error) => self.graph_listener.on_graph_error(error),
        }
    }
}

impl std::fmt::Debug for VirtualCameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualCameraState")
            .field("camera_id", &self.camera_id)
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Client handle for one camera request
#[derive(Debug, Clone)]
pub struct VirtualCamera {
    state: Arc<VirtualCameraState>,
}

impl VirtualCamera {
    pub(crate) fn new(state: Arc<VirtualCameraState>) -> Self {
        Self { state }
    }

    pub fn camera_id(&self) -> &CameraId {
        self.state.camera_id()
    }

    pub fn id(&self) -> uuid::Uuid {
        self.state.id()
    }

    pub fn status(&self) -> VirtualCameraStatus {
        self.state.status()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<VirtualCameraStatus> {
        self.state.status.subscribe()
    }

    /// Wait until the status satisfies `predicate` and return it
    pub async fn wait_for<F>(&self, mut predicate: F) -> VirtualCameraStatus
    where
        F: FnMut(&VirtualCameraStatus) -> bool,
    {
        let mut rx = self.subscribe();
        match rx.wait_for(|status| predicate(status)).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    /// Processor of the device this camera is attached to, if any
    pub fn request_processor(&self) -> Option<GraphRequestProcessor> {
        self.state.lock().processor.clone()
    }

    /// Stop using the camera
    ///
    /// The underlying device stays open until its idle timeout elapses, so a
    /// follow-up open of the same camera can reuse it.
    pub fn disconnect(&self) {
        self.state.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingListener {
        started: AtomicU32,
        stopped: AtomicU32,
        modified: AtomicU32,
        errors: Mutex<Vec<GraphStateError>>,
    }

    impl GraphListener for CountingListener {
        fn on_graph_started(&self, _request_processor: GraphRequestProcessor) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_graph_stopped(&self, _request_processor: Option<GraphRequestProcessor>) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_graph_modified(&self, _request_processor: GraphRequestProcessor) {
            self.modified.fetch_add(1, Ordering::SeqCst);
        }

        fn on_graph_error(&self, graph_state_error: GraphStateError) {
            self.errors.lock().unwrap().push(graph_state_error);
        }
    }

    fn binding() -> (Arc<VirtualCameraState>, Arc<CountingListener>) {
        let listener = Arc::new(CountingListener::default());
        let state = VirtualCameraState::new(CameraId::from("0"), listener.clone());
        (state, listener)
    }

    fn device() -> (watch::Sender<DeviceState>, GraphRequestProcessor) {
        let (tx, rx) = watch::channel(DeviceState::Open { revision: 0 });
        let processor = GraphRequestProcessor::new(CameraId::from("0"), uuid::Uuid::new_v4(), rx);
        (tx, processor)
    }

    #[tokio::test]
    async fn test_connect_starts_graph_once() {
        let (state, listener) = binding();
        let (tx, processor) = device();

        state.connect(tx.subscribe(), processor, None);

        assert_eq!(state.status(), VirtualCameraStatus::Connected);
        assert_eq!(listener.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_device_lifecycle_is_mirrored() {
        let (state, listener) = binding();
        let (tx, processor) = device();
        let camera = VirtualCamera::new(Arc::clone(&state));
        state.connect(tx.subscribe(), processor, None);

        tx.send_replace(DeviceState::Open { revision: 1 });
        tokio::task::yield_now().await;
        tx.send_replace(DeviceState::Closing);
        camera
            .wait_for(|s| *s == VirtualCameraStatus::Disconnecting)
            .await;
        tx.send_replace(DeviceState::Closed {
            error: Some(CameraError::Disconnected),
        });

        let status = camera.wait_for(VirtualCameraStatus::is_disconnected).await;
        assert_eq!(
            status,
            VirtualCameraStatus::Disconnected {
                error: Some(CameraError::Disconnected)
            }
        );
        assert_eq!(listener.started.load(Ordering::SeqCst), 1);
        assert_eq!(listener.modified.load(Ordering::SeqCst), 1);
        assert_eq!(listener.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(
            *listener.errors.lock().unwrap(),
            vec![GraphStateError::new(CameraError::Disconnected, false)]
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (state, listener) = binding();
        let (tx, processor) = device();
        state.connect(tx.subscribe(), processor, None);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || state.disconnect())
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        state.disconnect_with(Some(CameraError::Device));

        assert_eq!(
            state.status(),
            VirtualCameraStatus::Disconnected { error: None }
        );
        assert_eq!(listener.stopped.load(Ordering::SeqCst), 1);
        assert!(listener.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_after_disconnect_is_ignored() {
        let (state, listener) = binding();
        let (tx, processor) = device();

        state.disconnect();
        state.connect(tx.subscribe(), processor, None);

        assert!(state.status().is_disconnected());
        assert_eq!(listener.started.load(Ordering::SeqCst), 0);
        assert_eq!(listener.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recoverable_error_keeps_binding() {
        let (state, listener) = binding();
        let (tx, processor) = device();
        state.connect(tx.subscribe(), processor, None);

        state.report_error(CameraError::Service);

        assert_eq!(state.status(), VirtualCameraStatus::Connected);
        assert_eq!(
            *listener.errors.lock().unwrap(),
            vec![GraphStateError::new(CameraError::Service, true)]
        );
    }

    struct ReentrantListener {
        state: Mutex<Option<Arc<VirtualCameraState>>>,
        stopped: AtomicU32,
    }

    impl GraphListener for ReentrantListener {
        fn on_graph_started(&self, _request_processor: GraphRequestProcessor) {}

        fn on_graph_stopped(&self, _request_processor: Option<GraphRequestProcessor>) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_graph_modified(&self, _request_processor: GraphRequestProcessor) {}

        fn on_graph_error(&self, _graph_state_error: GraphStateError) {
            if let Some(state) = self.state.lock().unwrap().take() {
                state.disconnect();
            }
        }
    }

    #[tokio::test]
    async fn test_listener_may_disconnect_from_callback() {
        let listener = Arc::new(ReentrantListener {
            state: Mutex::new(None),
            stopped: AtomicU32::new(0),
        });
        let state = VirtualCameraState::new(CameraId::from("0"), listener.clone());
        *listener.state.lock().unwrap() = Some(Arc::clone(&state));
        let (tx, processor) = device();
        state.connect(tx.subscribe(), processor, None);

        state.report_error(CameraError::Device);

        assert!(state.status().is_disconnected());
        assert_eq!(listener.stopped.load(Ordering::SeqCst), 1);
    }
}
