//! Live views: a cached value kept current by a background refresh task.
//!
//! A view owns one worker task. Refresh requests bump a counter and wake the
//! task; the task waits out the debounce window, then performs a single fetch
//! covering every request made so far. Results are published as immutable
//! [`Snapshot`]s on a `watch` channel, so readers see the old value or the
//! new one, never a partial update.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::error::{EngineError, Result};
use crate::session::SessionHandle;

/// Something the change router can ask to refresh.
///
/// Requests are fire-and-forget; implementations coalesce them.
pub trait Refreshable: Send + Sync {
    fn request_refresh(&self);
}

/// One published state of a live view.
#[derive(Debug)]
pub struct Snapshot<T> {
    /// Number of refresh requests this value covers.
    pub generation: u64,
    pub value: Arc<T>,
    /// Set when the most recent refresh failed; `value` is then the last
    /// good result.
    pub error: Option<EngineError>,
    pub closed: bool,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            value: Arc::clone(&self.value),
            error: self.error.clone(),
            closed: self.closed,
        }
    }
}

struct Shared<T> {
    handle: SessionHandle,
    requested: AtomicU64,
    closed: AtomicBool,
    wake: Notify,
    state: watch::Sender<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> Refreshable for Shared<T> {
    fn request_refresh(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.requested.fetch_add(1, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// A value of type `T` re-fetched on demand.
pub struct LiveView<T> {
    shared: Arc<Shared<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> LiveView<T> {
    /// Perform the first fetch, then start the refresh task.
    ///
    /// Fails with the fetch's error; no task is left running in that case.
    pub async fn open<F, Fut>(handle: SessionHandle, debounce: Duration, fetch: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let first = fetch().await?;
        let (state, _) = watch::channel(Snapshot {
            generation: 0,
            value: Arc::new(first),
            error: None,
            closed: false,
        });
        let shared = Arc::new(Shared {
            handle,
            requested: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
            state,
        });
        let task = tokio::spawn(refresh_loop(Arc::clone(&shared), debounce, fetch));
        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.shared.handle
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.shared.state.borrow().clone()
    }

    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.shared.state.borrow().value)
    }

    /// Receiver that observes every published snapshot in order.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.shared.state.subscribe()
    }

    /// Weak refresh target for the change router.
    pub fn target(&self) -> Weak<dyn Refreshable> {
        let target: Weak<dyn Refreshable> = Arc::downgrade(&self.shared) as Weak<Shared<T>>;
        target
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Request a refresh and wait until a fetch covering it has been
    /// published.
    ///
    /// Calls made within one debounce window share a single fetch.
    pub async fn refresh(&self) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let target = self.shared.requested.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.wake.notify_one();

        let snapshot = rx
            .wait_for(|s| s.closed || s.generation >= target)
            .await
            .map_err(|_| self.closed_error())?;
        if snapshot.closed {
            return Err(self.closed_error());
        }
        match &snapshot.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Stop the refresh task. An in-flight fetch is abandoned and its
    /// result never published. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        self.shared.state.send_modify(|s| s.closed = true);
        tracing::debug!(handle = %self.shared.handle, "live view closed");
    }

    fn closed_error(&self) -> EngineError {
        EngineError::SessionClosed(self.shared.handle)
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

async fn refresh_loop<T, F, Fut>(shared: Arc<Shared<T>>, debounce: Duration, fetch: F)
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    loop {
        shared.wake.notified().await;
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }

        let target = shared.requested.load(Ordering::SeqCst);
        let published = shared.state.borrow().generation;
        if target <= published {
            continue;
        }

        let outcome = fetch().await;
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        match outcome {
            Ok(value) => {
                tracing::debug!(handle = %shared.handle, generation = target, "live view refreshed");
                shared.state.send_modify(|s| {
                    s.generation = target;
                    s.value = Arc::new(value);
                    s.error = None;
                });
            }
            Err(e) => {
                tracing::warn!(handle = %shared.handle, error = %e, "live view refresh failed");
                shared.state.send_modify(|s| {
                    s.generation = target;
                    s.error = Some(e);
                });
            }
        }
    }
}
