// SPDX-License-Identifier: GPL-3.0-only

//! Self-expiring reference count
//!
//! A [`WakeLock`] counts outstanding [`WakeLockToken`]s. Whenever the count
//! drops to zero a timer is armed; if no token is acquired before it fires the
//! lock closes and invokes its callback. The timer can also be armed on
//! creation, so a lock that is never acquired still expires.
//!
//! The callback returns whether it handled the expiry. A callback that
//! returns false reopens the lock and re-arms the timer, so it is tried again
//! one timeout later unless a token is acquired first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

type Callback = Box<dyn Fn() -> bool + Send + Sync>;

struct LockState {
    count: usize,
    closed: bool,
    timeout_task: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is re-armed or cancelled so a stale timer
    /// that already woke up does nothing.
    generation: u64,
}

struct WakeLockInner {
    name: String,
    timeout: Duration,
    runtime: Handle,
    callback: Callback,
    state: Mutex<LockState>,
}

impl WakeLockInner {
    fn lock(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_timeout(this: &Arc<Self>, state: &mut LockState) {
        if let Some(task) = state.timeout_task.take() {
            task.abort();
        }
        state.generation += 1;

        let generation = state.generation;
        let weak = Arc::downgrade(this);
        let timeout = this.timeout;
        state.timeout_task = Some(this.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                Self::expire(&inner, generation);
            }
        }));
    }

    fn expire(this: &Arc<Self>, generation: u64) {
        {
            let mut state = this.lock();
            if state.closed || state.count != 0 || state.generation != generation {
                return;
            }
            state.closed = true;
            state.timeout_task = None;
        }
        debug!(name = %this.name, "Wake lock timed out");
        Self::notify(this, generation);
    }

    /// Run the callback for a lock shut at `generation`
    ///
    /// Returns false if the callback declined, in which case the lock is open
    /// again with its timer armed.
    fn notify(this: &Arc<Self>, generation: u64) -> bool {
        if (this.callback)() {
            return true;
        }

        let mut state = this.lock();
        // Closed explicitly while the callback ran
        if state.generation != generation {
            return false;
        }
        debug!(name = %this.name, "Wake lock callback declined, re-arming");
        state.closed = false;
        if state.count == 0 {
            Self::start_timeout(this, &mut state);
        }
        false
    }

    fn release_token(this: &Arc<Self>) {
        let mut state = this.lock();
        state.count = state.count.saturating_sub(1);
        if state.count == 0 && !state.closed {
            Self::start_timeout(this, &mut state);
        }
    }

    /// Close the lock, returning the new generation, or `None` if it was
    /// already closed.
    fn shut(&self) -> Option<u64> {
        let mut state = self.lock();
        state.generation += 1;
        if state.closed {
            return None;
        }
        state.closed = true;
        if let Some(task) = state.timeout_task.take() {
            task.abort();
        }
        Some(state.generation)
    }
}

/// Timed reference count that fires a callback once it has been idle too long
///
/// Must be created from within a tokio runtime; the timer runs on that
/// runtime, while tokens may be released from any thread.
pub struct WakeLock {
    inner: Arc<WakeLockInner>,
}

impl WakeLock {
    /// Create a new wake lock
    ///
    /// # Arguments
    /// * `name` - Label used in logs
    /// * `timeout` - Idle time after which the lock expires
    /// * `start_timeout_on_creation` - Arm the timer immediately
    /// * `callback` - Invoked when the lock expires or is released; returns
    ///   false to keep the lock open and retry after another timeout
    pub fn new<F>(
        name: impl Into<String>,
        timeout: Duration,
        start_timeout_on_creation: bool,
        callback: F,
    ) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let inner = Arc::new(WakeLockInner {
            name: name.into(),
            timeout,
            runtime: Handle::current(),
            callback: Box::new(callback),
            state: Mutex::new(LockState {
                count: 0,
                closed: false,
                timeout_task: None,
                generation: 0,
            }),
        });

        if start_timeout_on_creation {
            let mut state = inner.lock();
            WakeLockInner::start_timeout(&inner, &mut state);
        }

        Self { inner }
    }

    /// Take a reference, cancelling any pending timeout
    ///
    /// Returns `None` once the lock has closed.
    pub fn acquire(&self) -> Option<WakeLockToken> {
        let mut state = self.inner.lock();
        if state.closed {
            return None;
        }
        state.count += 1;
        state.generation += 1;
        if let Some(task) = state.timeout_task.take() {
            task.abort();
        }
        drop(state);

        Some(WakeLockToken {
            inner: Arc::clone(&self.inner),
            released: AtomicBool::new(false),
        })
    }

    /// Close the lock right away and invoke the callback
    ///
    /// Returns false if the lock was already closed, or if the callback
    /// declined and the lock went back to counting down.
    pub fn release(&self) -> bool {
        let Some(generation) = self.inner.shut() else {
            return false;
        };
        debug!(name = %self.inner.name, "Wake lock released");
        WakeLockInner::notify(&self.inner, generation)
    }

    /// Close the lock without invoking the callback
    pub fn close(&self) -> bool {
        self.inner.shut().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        if let Some(task) = self.inner.lock().timeout_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for WakeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("WakeLock")
            .field("name", &self.inner.name)
            .field("count", &state.count)
            .field("closed", &state.closed)
            .finish()
    }
}

/// One outstanding reference on a [`WakeLock`]
///
/// Released explicitly with [`WakeLockToken::release`] or on drop.
pub struct WakeLockToken {
    inner: Arc<WakeLockInner>,
    released: AtomicBool,
}

impl WakeLockToken {
    /// Give the reference back; returns false if it was already released
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        WakeLockInner::release_token(&self.inner);
        true
    }
}

impl Drop for WakeLockToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for WakeLockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLockToken")
            .field("name", &self.inner.name)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_lock(start_on_creation: bool) -> (WakeLock, Arc<AtomicU32>) {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);
        let lock = WakeLock::new(
            "test",
            Duration::from_millis(1000),
            start_on_creation,
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
                true
            },
        );
        (lock, fired)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_without_acquire() {
        let (lock, fired) = counting_lock(true);

        advance(999).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(lock.is_closed());
        assert!(lock.acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timer_until_first_release() {
        let (lock, fired) = counting_lock(false);

        advance(5000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let token = lock.acquire().expect("lock is open");
        drop(token);
        advance(1001).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancels_timeout() {
        let (lock, fired) = counting_lock(true);

        advance(500).await;
        let token = lock.acquire().expect("lock is open");
        advance(5000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Releasing re-arms the full timeout
        assert!(token.release());
        assert!(!token.release());
        advance(999).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        advance(2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_waits_for_all_tokens() {
        let (lock, fired) = counting_lock(true);

        let first = lock.acquire().expect("lock is open");
        let second = lock.acquire().expect("lock is open");
        drop(first);
        advance(2000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        drop(second);
        advance(1001).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_fires_once() {
        let (lock, fired) = counting_lock(true);

        assert!(lock.release());
        assert!(!lock.release());
        advance(2000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_silent() {
        let (lock, fired) = counting_lock(true);

        assert!(lock.close());
        assert!(!lock.release());
        advance(2000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_callback_retries_after_timeout() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let lock = WakeLock::new("test", Duration::from_millis(1000), true, move || {
            attempts_clone.fetch_add(1, Ordering::SeqCst) > 0
        });

        advance(1001).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!lock.is_closed());

        advance(1000).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(lock.is_closed());

        advance(5000).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_release_keeps_lock_usable() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let lock = WakeLock::new("test", Duration::from_millis(1000), false, move || {
            attempts_clone.fetch_add(1, Ordering::SeqCst) > 0
        });

        assert!(!lock.release());
        assert!(!lock.is_closed());

        // A token taken now holds the retry off until it is given back
        let token = lock.acquire().expect("lock reopened");
        advance(3000).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        drop(token);
        advance(1001).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(lock.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_declined_callback_stays_closed() {
        let slot: Arc<Mutex<Option<Arc<WakeLockInner>>>> = Arc::new(Mutex::new(None));
        let slot_clone = Arc::clone(&slot);
        let lock = WakeLock::new("test", Duration::from_millis(1000), true, move || {
            if let Some(inner) = slot_clone.lock().unwrap().take() {
                inner.shut();
            }
            false
        });
        *slot.lock().unwrap() = Some(Arc::clone(&lock.inner));

        advance(1001).await;
        assert!(lock.is_closed());
        advance(5000).await;
        assert!(lock.is_closed());
        assert!(lock.acquire().is_none());
    }
}
