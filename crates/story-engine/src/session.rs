//! Live query sessions.
//!
//! A session binds a compiled [`StoryQuery`] to the store. Its results are
//! re-fetched on explicit refresh and whenever the change router reports a
//! relevant mutation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use story_core::{Story, StoryQuery};
use tokio::sync::watch;

use crate::error::{EngineError, Result};
use crate::live::{LiveView, Snapshot};
use crate::router::{ChangeRouter, ObserverId};
use crate::worker::StoreWorker;

/// Identifies an open session or live view. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Published state of one session's result set.
pub type ResultsSnapshot = Snapshot<Vec<Story>>;

struct Session {
    query: StoryQuery,
    view: LiveView<Vec<Story>>,
    observer: ObserverId,
}

/// Registry of open sessions.
pub struct LiveQuerySessions {
    worker: StoreWorker,
    router: ChangeRouter,
    debounce: Duration,
    sessions: Mutex<HashMap<SessionHandle, Arc<Session>>>,
}

impl LiveQuerySessions {
    pub fn new(worker: StoreWorker, router: ChangeRouter, debounce: Duration) -> Self {
        Self {
            worker,
            router,
            debounce,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a session and run its first fetch.
    pub async fn open(&self, query: StoryQuery) -> Result<SessionHandle> {
        let handle = SessionHandle::next();
        let worker = self.worker.clone();
        let fetch_query = query.clone();
        let view = LiveView::open(handle, self.debounce, move || {
            let worker = worker.clone();
            let q = fetch_query.clone();
            async move {
                let stories = worker.run(move |s| s.fetch(&q)).await?;
                tracing::debug!(%handle, count = stories.len(), "session fetched");
                Ok(stories)
            }
        })
        .await?;

        let observer = self.router.register(view.target());
        let session = Arc::new(Session {
            query,
            view,
            observer,
        });
        self.lock().insert(handle, session);
        tracing::debug!(%handle, "session opened");
        Ok(handle)
    }

    /// The latest result snapshot. Never blocks on the store.
    pub fn current_results(&self, handle: SessionHandle) -> Result<Arc<Vec<Story>>> {
        Ok(self.get(handle)?.view.current())
    }

    /// Re-run the session's query; resolves once a fetch covering this call
    /// has been published. Concurrent calls are coalesced.
    pub async fn refresh(&self, handle: SessionHandle) -> Result<()> {
        let session = self.get(handle)?;
        session.view.refresh().await
    }

    /// Receiver for every snapshot the session publishes.
    pub fn watch(&self, handle: SessionHandle) -> Result<watch::Receiver<ResultsSnapshot>> {
        Ok(self.get(handle)?.view.subscribe())
    }

    pub fn query(&self, handle: SessionHandle) -> Result<StoryQuery> {
        Ok(self.get(handle)?.query.clone())
    }

    /// Close a session. Later operations on the handle fail with
    /// `SessionClosed`; an in-flight refresh is discarded.
    pub fn close(&self, handle: SessionHandle) -> Result<()> {
        let session = self
            .lock()
            .remove(&handle)
            .ok_or(EngineError::SessionClosed(handle))?;
        self.router.unregister(session.observer);
        session.view.close();
        Ok(())
    }

    /// Close every open session.
    pub fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            self.router.unregister(session.observer);
            session.view.close();
        }
    }

    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    fn get(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        self.lock()
            .get(&handle)
            .cloned()
            .ok_or(EngineError::SessionClosed(handle))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionHandle, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
