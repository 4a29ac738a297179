// SPDX-License-Identifier: GPL-3.0-only

//! Request mailbox of the device manager
//!
//! Producers (`open`, `close`, `close_all`, wake lock timers) only ever
//! `try_send`; the request loop is the single consumer and drains everything
//! available into a batch before deciding what to do.

use super::active_camera::ActiveCamera;
use super::virtual_camera::VirtualCameraState;
use crate::backends::camera::CameraId;
use crate::errors::{SessionError, SessionResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Predicate telling the opener whether the requesting client is in the foreground
pub type ForegroundObserver = Arc<dyn Fn() -> bool + Send + Sync>;

/// Request to bind `virtual_camera` to its camera
#[derive(Clone)]
pub(crate) struct RequestOpen {
    pub virtual_camera: Arc<VirtualCameraState>,
    /// Cameras that must be open together with this one (all or nothing)
    pub shared_camera_ids: Vec<CameraId>,
    pub is_prewarm: bool,
    pub is_foreground: ForegroundObserver,
}

impl RequestOpen {
    pub fn camera_id(&self) -> &CameraId {
        self.virtual_camera.camera_id()
    }
}

pub(crate) enum CameraRequest {
    Open(RequestOpen),
    /// Close a specific active camera. May race with a slow open of the same
    /// camera, so it is matched by identity rather than by id.
    Close(Arc<ActiveCamera>),
    CloseById(CameraId),
    CloseAll,
}

impl std::fmt::Debug for CameraRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraRequest::Open(request) => f
                .debug_struct("Open")
                .field("camera_id", request.camera_id())
                .field("shared_camera_ids", &request.shared_camera_ids)
                .field("is_prewarm", &request.is_prewarm)
                .finish(),
            CameraRequest::Close(active) => f
                .debug_tuple("Close")
                .field(active.camera_id())
                .finish(),
            CameraRequest::CloseById(camera_id) => {
                f.debug_tuple("CloseById").field(camera_id).finish()
            }
            CameraRequest::CloseAll => write!(f, "CloseAll"),
        }
    }
}

/// Sending side of the mailbox
#[derive(Clone)]
pub(crate) struct RequestQueue {
    sender: mpsc::Sender<CameraRequest>,
    accepted: Arc<AtomicU64>,
}

impl RequestQueue {
    pub fn new(depth: usize) -> (Self, RequestReceiver) {
        let (sender, receiver) = mpsc::channel(depth);
        let queue = Self {
            sender,
            accepted: Arc::new(AtomicU64::new(0)),
        };
        (queue, RequestReceiver { receiver })
    }

    /// Enqueue without waiting; fails when the mailbox is full
    pub fn try_send(&self, request: CameraRequest) -> SessionResult<()> {
        self.sender.try_send(request)?;
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Number of requests accepted so far
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    /// A handle that does not keep the request loop alive
    pub fn downgrade(&self) -> WeakRequestQueue {
        WeakRequestQueue {
            sender: self.sender.downgrade(),
            accepted: Arc::clone(&self.accepted),
        }
    }
}

/// Sending side held by active cameras
#[derive(Clone)]
pub(crate) struct WeakRequestQueue {
    sender: mpsc::WeakSender<CameraRequest>,
    accepted: Arc<AtomicU64>,
}

impl WeakRequestQueue {
    pub fn try_send(&self, request: CameraRequest) -> SessionResult<()> {
        let sender = self.sender.upgrade().ok_or(SessionError::ManagerClosed)?;
        sender.try_send(request)?;
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Receiving side, owned by the request loop
pub(crate) struct RequestReceiver {
    receiver: mpsc::Receiver<CameraRequest>,
}

impl RequestReceiver {
    /// Top up `requests` with everything currently queued
    ///
    /// Blocks only when `requests` is empty. Returns the number of requests
    /// read, or `None` once the mailbox is closed and nothing is left to do.
    pub async fn read_batch(&mut self, requests: &mut Vec<CameraRequest>) -> Option<usize> {
        let mut received = 0;
        if requests.is_empty() {
            requests.push(self.receiver.recv().await?);
            received += 1;
        }

        // More requests may have piled up while the loop was busy (e.g. opening a camera)
        while let Ok(request) = self.receiver.try_recv() {
            requests.push(request);
            received += 1;
        }
        Some(received)
    }
}
