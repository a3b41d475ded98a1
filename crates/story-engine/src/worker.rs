//! Background execution of store calls.

use std::sync::Arc;

use story_core::{StoreError, StoryStore};

use crate::error::{EngineError, Result};

/// Moves blocking store calls off the async executor.
///
/// Each `run` is one suspension point for the caller.
#[derive(Clone)]
pub struct StoreWorker {
    store: Arc<dyn StoryStore>,
}

impl StoreWorker {
    pub fn new(store: Arc<dyn StoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn StoryStore> {
        &self.store
    }

    /// Run `op` against the store on the blocking pool.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StoryStore) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| EngineError::StoreUnavailable(format!("store worker: {}", e)))?
            .map_err(EngineError::from)
    }
}
