// SPDX-License-Identifier: GPL-3.0-only

//! Camera device manager
//!
//! The manager provides:
//! - Non-blocking `open`/`close`/`close_all` entry points for clients
//! - A single request loop that owns every opened camera
//! - Arbitration between exclusive and shared (multi-camera) opens
//!
//! # Request loop
//!
//! Each iteration takes one decision and starts over, since any await may let
//! new requests pile up:
//!
//! 1. `Close` anywhere in the batch wins
//! 2. `CloseById` is honored once it reaches the head of the batch
//! 3. `CloseAll` discards everything queued before it
//! 4. Otherwise the head is an `Open`: close cameras whose id set conflicts,
//!    then open or reuse the camera, then attach the virtual camera

use super::active_camera::ActiveCamera;
use super::error_processor::CameraErrorProcessor;
use super::graph::{GraphListener, NoOpGraphListener};
use super::opener::RetryingCameraOpener;
use super::request::{
    CameraRequest, ForegroundObserver, RequestOpen, RequestQueue, RequestReceiver,
    WeakRequestQueue,
};
use super::virtual_camera::{VirtualCamera, VirtualCameraState};
use crate::backends::camera::{CameraBackend, CameraError, CameraId, GraphStateError};
use crate::config::SessionConfig;
use crate::errors::{SessionError, SessionResult};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// A camera currently held open by the request loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCameraSummary {
    pub camera_id: CameraId,
    /// The camera plus every camera it was opened together with
    pub all_camera_ids: BTreeSet<CameraId>,
}

/// Point-in-time view of the request loop, published after every step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerSnapshot {
    pub active_cameras: Vec<ActiveCameraSummary>,
    /// Cameras of shared opens waiting for their siblings
    pub pending_opens: Vec<CameraId>,
    /// The loop has nothing left to do and is waiting for requests
    pub idle: bool,
    /// Requests taken off the mailbox so far
    pub received: u64,
}

impl ManagerSnapshot {
    pub fn is_active(&self, camera_id: &CameraId) -> bool {
        self.active_cameras
            .iter()
            .any(|camera| &camera.camera_id == camera_id)
    }
}

/// Entry point for opening and closing cameras
///
/// Must be created inside a tokio runtime. Dropping the manager stops the
/// request loop, which closes every camera it still holds.
pub struct CameraDeviceManager {
    queue: RequestQueue,
    snapshot: watch::Receiver<ManagerSnapshot>,
}

impl CameraDeviceManager {
    /// Create a manager and start its request loop
    pub fn new(backend: Arc<dyn CameraBackend>, config: &SessionConfig) -> Self {
        info!(
            queue_depth = config.request_queue_depth,
            max_attempts = config.retry.max_attempts,
            "Creating camera device manager"
        );

        let error_processor = Arc::new(CameraErrorProcessor::new());
        let (queue, receiver) = RequestQueue::new(config.request_queue_depth);
        let (snapshot_tx, snapshot) = watch::channel(ManagerSnapshot::default());

        let request_loop = RequestLoop {
            receiver,
            queue: queue.downgrade(),
            opener: RetryingCameraOpener::new(
                backend,
                Arc::clone(&error_processor),
                config.retry.clone(),
            ),
            error_processor,
            active_cameras: Vec::new(),
            pending_request_opens: Vec::new(),
            snapshot: snapshot_tx,
            received: 0,
        };
        tokio::spawn(request_loop.run());

        Self { queue, snapshot }
    }

    /// Request `camera_id`, optionally together with `shared_camera_ids`
    ///
    /// Returns immediately with an unopened [`VirtualCamera`]; the request
    /// loop connects it later. Returns `None` (after reporting an
    /// [`CameraError::Opener`] error to `graph_listener`) when the request
    /// could not be queued.
    pub fn open(
        &self,
        camera_id: CameraId,
        shared_camera_ids: Vec<CameraId>,
        graph_listener: Arc<dyn GraphListener>,
        is_prewarm: bool,
        is_foreground: ForegroundObserver,
    ) -> Option<VirtualCamera> {
        debug_assert!(
            !is_prewarm || shared_camera_ids.is_empty(),
            "Prewarming concurrent cameras is not supported"
        );
        if let Err(e) = check_open_request(&shared_camera_ids, is_prewarm) {
            error!(camera = %camera_id, error = %e, "Rejecting open request");
            graph_listener.on_graph_error(GraphStateError::new(CameraError::IllegalArgument, false));
            return None;
        }

        let state = VirtualCameraState::new(camera_id.clone(), Arc::clone(&graph_listener));
        let request = RequestOpen {
            virtual_camera: Arc::clone(&state),
            shared_camera_ids,
            is_prewarm,
            is_foreground,
        };

        if let Err(e) = self.queue.try_send(CameraRequest::Open(request)) {
            error!(camera = %camera_id, error = %e, "Camera open request failed");
            graph_listener.on_graph_error(GraphStateError::new(CameraError::Opener, false));
            return None;
        }
        Some(VirtualCamera::new(state))
    }

    /// Open `camera_id` ahead of time without binding it
    pub fn prewarm(&self, camera_id: CameraId) {
        debug!(camera = %camera_id, "Prewarming camera");
        let _ = self.open(
            camera_id,
            Vec::new(),
            Arc::new(NoOpGraphListener),
            true,
            Arc::new(|| false),
        );
    }

    /// Close whichever camera currently owns `camera_id`
    ///
    /// Returns false when the request could not be queued.
    pub fn close(&self, camera_id: CameraId) -> bool {
        if let Err(e) = self.queue.try_send(CameraRequest::CloseById(camera_id.clone())) {
            warn!(camera = %camera_id, error = %e, "Failed to submit close request");
            return false;
        }
        true
    }

    /// Close every camera and drop every open request queued so far
    ///
    /// Returns false when the request could not be queued.
    pub fn close_all(&self) -> bool {
        if let Err(e) = self.queue.try_send(CameraRequest::CloseAll) {
            warn!(error = %e, "Failed to close all cameras");
            return false;
        }
        true
    }

    /// Latest published state of the request loop
    pub fn snapshot(&self) -> ManagerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<ManagerSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the loop has handled every request queued before this call
    pub async fn wait_idle(&self) {
        let target = self.queue.accepted();
        let mut rx = self.snapshot.clone();
        let _ = rx
            .wait_for(|snapshot| snapshot.idle && snapshot.received >= target)
            .await;
    }
}

impl std::fmt::Debug for CameraDeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraDeviceManager")
            .field("accepted", &self.queue.accepted())
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}

/// State owned by the request loop task
struct RequestLoop {
    receiver: RequestReceiver,
    queue: WeakRequestQueue,
    opener: RetryingCameraOpener,
    error_processor: Arc<CameraErrorProcessor>,
    active_cameras: Vec<Arc<ActiveCamera>>,
    /// Shared opens waiting for their sibling cameras
    pending_request_opens: Vec<RequestOpen>,
    snapshot: watch::Sender<ManagerSnapshot>,
    received: u64,
}

impl RequestLoop {
    async fn run(mut self) {
        let mut requests = Vec::new();

        loop {
            if requests.is_empty() {
                self.publish(true);
            }
            match self.receiver.read_batch(&mut requests).await {
                Some(count) => self.received += count as u64,
                None => break,
            }
            self.publish(false);
            self.step(&mut requests).await;
        }

        self.shutdown().await;
    }

    /// Take one decision on the current batch
    async fn step(&mut self, requests: &mut Vec<CameraRequest>) {
        // A specific camera must go away, e.g. its idle timeout elapsed
        if let Some(index) = requests
            .iter()
            .position(|request| matches!(request, CameraRequest::Close(_)))
        {
            if let CameraRequest::Close(camera) = requests.remove(index) {
                self.handle_close(camera).await;
            }
            return;
        }

        // Only once every request queued before it has been handled
        if matches!(requests.first(), Some(CameraRequest::CloseById(_))) {
            if let CameraRequest::CloseById(camera_id) = requests.remove(0) {
                self.handle_close_by_id(camera_id).await;
            }
            return;
        }

        if let Some(last) = requests
            .iter()
            .rposition(|request| matches!(request, CameraRequest::CloseAll))
        {
            for request in requests.drain(..=last) {
                if let CameraRequest::Open(request) = request {
                    request.virtual_camera.disconnect();
                }
            }
            self.handle_close_all().await;
            return;
        }

        let request = match requests.first() {
            Some(CameraRequest::Open(request)) => request.clone(),
            other => unreachable!("Unexpected request at head of batch: {other:?}"),
        };
        if self.handle_open(request).await {
            requests.remove(0);
        }
    }

    async fn handle_close(&mut self, camera: Arc<ActiveCamera>) {
        let position = self
            .active_cameras
            .iter()
            .position(|active| Arc::ptr_eq(active, &camera));

        debug!(camera = %camera.camera_id(), live = position.is_some(), "Handling close request");

        // A stale handle must not touch the state of its replacement
        let Some(position) = position else {
            close_and_await(vec![camera]).await;
            return;
        };
        self.active_cameras.remove(position);
        let camera_id = camera.camera_id().clone();
        self.purge_pending_request_opens(|id| *id == camera_id);
        self.retire(vec![camera]).await;
    }

    async fn handle_close_by_id(&mut self, camera_id: CameraId) {
        self.purge_pending_request_opens(|id| *id == camera_id);

        let Some(position) = self
            .active_cameras
            .iter()
            .position(|active| *active.camera_id() == camera_id)
        else {
            debug!(camera = %camera_id, "Close requested for camera that is not open");
            return;
        };
        let camera = self.active_cameras.remove(position);
        self.retire(vec![camera]).await;
    }

    async fn handle_close_all(&mut self) {
        let cameras = std::mem::take(&mut self.active_cameras);
        info!(count = cameras.len(), "Closing all cameras");
        self.purge_pending_request_opens(|_| true);
        self.retire(cameras).await;
    }

    /// Advance the open request at the head of the batch
    ///
    /// Returns true once the request is done with and can leave the batch.
    async fn handle_open(&mut self, request: RequestOpen) -> bool {
        debug_assert!(
            !request.is_prewarm || request.shared_camera_ids.is_empty(),
            "Prewarming concurrent cameras is not supported"
        );

        // Disconnected while it sat in the mailbox
        if !request.virtual_camera.is_unopened() {
            debug!(camera = %request.camera_id(), "Skipping open for stale virtual camera");
            return true;
        }

        let camera_id = request.camera_id().clone();
        let desired: BTreeSet<CameraId> = request
            .shared_camera_ids
            .iter()
            .cloned()
            .chain(std::iter::once(camera_id.clone()))
            .collect();

        // Closing happens first and may take a while; re-evaluate afterwards
        let (to_close, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active_cameras)
            .into_iter()
            .partition(|active| *active.all_camera_ids() != desired);
        self.active_cameras = kept;
        if !to_close.is_empty() {
            let closing: BTreeSet<CameraId> = to_close
                .iter()
                .map(|active| active.camera_id().clone())
                .collect();
            info!(camera = %camera_id, closing = ?closing, "Closing conflicting cameras");
            self.purge_pending_request_opens(|id| closing.contains(id));
            self.retire(to_close).await;
            return false;
        }

        let Some(active) = self.find_active(&camera_id) else {
            match self
                .opener
                .open_camera_with_retry(&camera_id, &request.is_foreground)
                .await
            {
                Ok(device) => {
                    debug_assert!(
                        self.find_active(&camera_id).is_none(),
                        "{camera_id} opened twice"
                    );
                    let camera = ActiveCamera::new(device, desired, self.queue.clone());
                    self.active_cameras.push(camera);
                    return false;
                }
                Err(error) => {
                    warn!(camera = %camera_id, error = %error, "Failed to open camera");
                    request.virtual_camera.disconnect_with(Some(error));
                    return true;
                }
            }
        };

        if !request.shared_camera_ids.is_empty() {
            if request
                .shared_camera_ids
                .iter()
                .all(|id| self.find_active(id).is_some())
            {
                debug_assert!(!request.is_prewarm);
                self.attach(&active, &request.virtual_camera);
                self.connect_pending_request_opens(&request.shared_camera_ids);
            } else {
                debug!(camera = %camera_id, "Waiting for shared cameras");
                self.pending_request_opens.push(request);
            }
        } else if !request.is_prewarm {
            self.attach(&active, &request.virtual_camera);
        }
        true
    }

    /// Connect `virtual_camera` and make it the target of `active`'s device errors
    fn attach(&self, active: &ActiveCamera, virtual_camera: &Arc<VirtualCameraState>) {
        self.error_processor
            .set_active_virtual_camera(active.camera_id(), virtual_camera);
        active.connect_to(virtual_camera);
    }

    /// Connect pending opens for `camera_ids` whose cameras are now all open
    fn connect_pending_request_opens(&mut self, camera_ids: &[CameraId]) {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_request_opens)
            .into_iter()
            .partition(|request| camera_ids.contains(request.camera_id()));
        self.pending_request_opens = waiting;

        for request in ready {
            // Shared sets never overlap, so the whole set must be open by now
            let all_open = request
                .shared_camera_ids
                .iter()
                .all(|id| self.find_active(id).is_some());
            debug_assert!(all_open, "{} connected before its shared cameras", request.camera_id());

            match self.find_active(request.camera_id()) {
                Some(active) if all_open => self.attach(&active, &request.virtual_camera),
                _ => self.pending_request_opens.push(request),
            }
        }
    }

    /// Drop pending opens whose camera matches, disconnecting their virtual cameras
    fn purge_pending_request_opens(&mut self, matches: impl Fn(&CameraId) -> bool) {
        self.pending_request_opens.retain(|request| {
            if !matches(request.camera_id()) {
                return true;
            }
            request.virtual_camera.disconnect();
            false
        });
    }

    /// Close cameras that already left the live set
    async fn retire(&self, cameras: Vec<Arc<ActiveCamera>>) {
        for camera in &cameras {
            self.error_processor
                .clear_active_virtual_camera(camera.camera_id());
        }
        close_and_await(cameras).await;
    }

    fn find_active(&self, camera_id: &CameraId) -> Option<Arc<ActiveCamera>> {
        self.active_cameras
            .iter()
            .find(|active| active.camera_id() == camera_id)
            .cloned()
    }

    fn publish(&self, idle: bool) {
        let snapshot = ManagerSnapshot {
            active_cameras: self
                .active_cameras
                .iter()
                .map(|active| ActiveCameraSummary {
                    camera_id: active.camera_id().clone(),
                    all_camera_ids: active.all_camera_ids().clone(),
                })
                .collect(),
            pending_opens: self
                .pending_request_opens
                .iter()
                .map(|request| request.camera_id().clone())
                .collect(),
            idle,
            received: self.received,
        };
        self.snapshot.send_replace(snapshot);
    }

    async fn shutdown(mut self) {
        info!(
            active = self.active_cameras.len(),
            pending = self.pending_request_opens.len(),
            "Request loop stopping"
        );
        let cameras = std::mem::take(&mut self.active_cameras);
        self.purge_pending_request_opens(|_| true);
        self.retire(cameras).await;
        self.publish(true);
    }
}

/// Reject open requests the request loop cannot serve
fn check_open_request(shared_camera_ids: &[CameraId], is_prewarm: bool) -> SessionResult<()> {
    if is_prewarm && !shared_camera_ids.is_empty() {
        return Err(SessionError::InvalidRequest(
            "prewarm with shared cameras".to_string(),
        ));
    }
    Ok(())
}

/// Close every camera on its own task and wait until all of them are closed
async fn close_and_await(cameras: Vec<Arc<ActiveCamera>>) {
    for camera in &cameras {
        info!(camera = %camera.camera_id(), "Closing camera");
        let camera = Arc::clone(camera);
        tokio::spawn(async move { camera.close().await });
    }
    join_all(cameras.iter().map(|camera| camera.await_closed())).await;
}
