//! Change notification routing.
//!
//! The router subscribes to the store's change feed once. The store callback
//! only forwards events into an unbounded channel; a single router task
//! drops events for other entity kinds, coalesces bursts, and asks every
//! registered live view to refresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use story_core::{ChangeEvent, EntityKind, SubscriptionId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::live::Refreshable;
use crate::worker::StoreWorker;

/// A continuous stream still dispatches after this many debounce windows.
const MAX_COALESCE_WINDOWS: u32 = 4;

/// Identifies one registration with the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Health of the store's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedStatus {
    Live,
    /// Views are no longer refreshed on change; their data may be stale.
    Degraded { reason: String },
}

impl FeedStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, FeedStatus::Degraded { .. })
    }
}

struct Registry {
    observers: Mutex<HashMap<ObserverId, Weak<dyn Refreshable>>>,
    next_id: AtomicU64,
    status: watch::Sender<FeedStatus>,
}

impl Registry {
    fn observers(&self) -> std::sync::MutexGuard<'_, HashMap<ObserverId, Weak<dyn Refreshable>>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask every live observer to refresh, pruning dead ones.
    fn dispatch(&self) -> usize {
        let targets: Vec<Arc<dyn Refreshable>> = {
            let mut observers = self.observers();
            observers.retain(|_, weak| weak.strong_count() > 0);
            observers.values().filter_map(Weak::upgrade).collect()
        };
        for target in &targets {
            target.request_refresh();
        }
        targets.len()
    }

    fn degrade(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(%reason, "change feed degraded; live views may be stale");
        self.status.send_replace(FeedStatus::Degraded { reason });
    }
}

struct RouterInner {
    registry: Arc<Registry>,
    worker: StoreWorker,
    subscription: Mutex<Option<SubscriptionId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

/// Fans store change events out to registered live views.
#[derive(Clone)]
pub struct ChangeRouter {
    inner: Arc<RouterInner>,
}

impl ChangeRouter {
    /// Subscribe to the store's change feed and start the router task.
    ///
    /// A failed subscription does not fail startup: the router comes up in
    /// degraded mode and views refresh only on request.
    pub async fn start(worker: StoreWorker, debounce: Duration) -> Self {
        let (status, _) = watch::channel(FeedStatus::Live);
        let registry = Arc::new(Registry {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            status,
        });

        let (tx, rx) = mpsc::unbounded_channel::<ChangeEvent>();
        let subscribed = worker
            .run(move |s| {
                s.subscribe(Box::new(move |event| {
                    // A send error only means the router is gone.
                    let _ = tx.send(event);
                }))
            })
            .await;

        let (subscription, task) = match subscribed {
            Ok(id) => {
                tracing::debug!(subscription = id, "change router subscribed");
                let task = tokio::spawn(route(Arc::clone(&registry), rx, debounce));
                (Some(id), Some(task))
            }
            Err(e) => {
                registry.degrade(format!("subscribe failed: {}", e));
                (None, None)
            }
        };

        Self {
            inner: Arc::new(RouterInner {
                registry,
                worker,
                subscription: Mutex::new(subscription),
                task: Mutex::new(task),
            }),
        }
    }

    pub fn register(&self, target: Weak<dyn Refreshable>) -> ObserverId {
        let id = ObserverId(self.inner.registry.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.registry.observers().insert(id, target);
        id
    }

    pub fn unregister(&self, id: ObserverId) {
        self.inner.registry.observers().remove(&id);
    }

    /// Registered observers that are still alive.
    pub fn observer_count(&self) -> usize {
        self.inner
            .registry
            .observers()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn status(&self) -> FeedStatus {
        self.inner.registry.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.inner.registry.status.subscribe()
    }

    /// Stop routing and drop the store subscription.
    pub async fn shutdown(&self) {
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            if let Err(e) = self.inner.worker.run(move |s| s.unsubscribe(id)).await {
                tracing::warn!(error = %e, "failed to unsubscribe change router");
            }
        }
        self.inner.registry.observers().clear();
        tracing::debug!("change router stopped");
    }
}

fn is_relevant(event: &ChangeEvent) -> bool {
    event.kind == EntityKind::Story
}

async fn route(
    registry: Arc<Registry>,
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
    debounce: Duration,
) {
    while let Some(event) = rx.recv().await {
        if !is_relevant(&event) {
            continue;
        }

        // Wait for the feed to go quiet, bounded so a steady stream of
        // events still triggers refreshes.
        let deadline = Instant::now() + debounce * MAX_COALESCE_WINDOWS;
        let mut coalesced = 1usize;
        let mut feed_closed = false;
        while !debounce.is_zero() {
            let quiet_until = (Instant::now() + debounce).min(deadline);
            match tokio::time::timeout_at(quiet_until, rx.recv()).await {
                Ok(Some(next)) => {
                    if is_relevant(&next) {
                        coalesced += 1;
                    }
                }
                Ok(None) => {
                    feed_closed = true;
                    break;
                }
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        let notified = registry.dispatch();
        tracing::debug!(events = coalesced, observers = notified, "dispatched change burst");

        if feed_closed {
            break;
        }
    }
    registry.degrade("change feed closed by store");
}
