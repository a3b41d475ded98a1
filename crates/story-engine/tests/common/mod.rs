//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use story_core::{
    Aggregation, ChangeCallback, Field, GroupCount, MemoryStore, Predicate, Row, StoreError,
    Story, StoryId, StoryMutation, StoryQuery, StoryStore, SubscriptionId, Tag, TagId,
};
use story_engine::EngineConfig;

/// Memory store that counts fetches and can refuse subscriptions.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    fetches: AtomicUsize,
    aggregates: AtomicUsize,
    refuse_feed: AtomicBool,
}

impl CountingStore {
    pub fn refusing_feed() -> Self {
        let store = Self::default();
        store.refuse_feed.store(true, Ordering::SeqCst);
        store
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn aggregates(&self) -> usize {
        self.aggregates.load(Ordering::SeqCst)
    }
}

impl StoryStore for CountingStore {
    fn insert(&self, story: Story) -> Result<StoryId, StoreError> {
        self.inner.insert(story)
    }

    fn get(&self, id: StoryId) -> Result<Option<Story>, StoreError> {
        self.inner.get(id)
    }

    fn update(&self, id: StoryId, mutations: Vec<StoryMutation>) -> Result<(), StoreError> {
        self.inner.update(id, mutations)
    }

    fn delete(&self, id: StoryId) -> Result<(), StoreError> {
        self.inner.delete(id)
    }

    fn fetch(&self, q: &StoryQuery) -> Result<Vec<Story>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(q)
    }

    fn count(&self, predicate: &Predicate) -> Result<usize, StoreError> {
        self.inner.count(predicate)
    }

    fn project(&self, predicate: &Predicate, fields: &[Field]) -> Result<Vec<Row>, StoreError> {
        self.inner.project(predicate, fields)
    }

    fn aggregate(&self, q: &Aggregation) -> Result<Vec<GroupCount>, StoreError> {
        self.aggregates.fetch_add(1, Ordering::SeqCst);
        self.inner.aggregate(q)
    }

    fn find_or_create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        self.inner.find_or_create_tag(name)
    }

    fn tags(&self) -> Result<Vec<Tag>, StoreError> {
        self.inner.tags()
    }

    fn rename_tag(&self, id: TagId, name: &str) -> Result<(), StoreError> {
        self.inner.rename_tag(id, name)
    }

    fn delete_tag(&self, id: TagId) -> Result<(), StoreError> {
        self.inner.delete_tag(id)
    }

    fn subscribe(&self, on_change: ChangeCallback) -> Result<SubscriptionId, StoreError> {
        if self.refuse_feed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("change feed disabled".to_string()));
        }
        self.inner.subscribe(on_change)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.inner.unsubscribe(id)
    }
}

pub fn config(debounce_ms: u64) -> EngineConfig {
    EngineConfig {
        debounce_ms,
        default_min_duplicates: 2,
        sample_seed: Some(7),
    }
}

/// Generous upper bound for anything the router should deliver.
pub const DELIVERY: Duration = Duration::from_secs(3);
