//! The engine facade.
//!
//! Owns the store worker, the change router and every component built on
//! them. Must be started inside a tokio runtime.

use std::sync::Arc;

use story_core::{Story, StoryId, StoryMutation, StoryQuery, StoryStore, Tag, TagId};
use tokio::sync::watch;

use crate::compiler;
use crate::config::EngineConfig;
use crate::duplicates::{DuplicateGroup, DuplicateGrouper, DuplicateView, GroupKey, GroupableField};
use crate::error::Result;
use crate::filter::FilterOptions;
use crate::router::{ChangeRouter, FeedStatus};
use crate::sampler::RandomSampler;
use crate::session::{LiveQuerySessions, ResultsSnapshot, SessionHandle};
use crate::tags::TagService;
use crate::worker::StoreWorker;

pub struct StoryEngine {
    config: EngineConfig,
    worker: StoreWorker,
    router: ChangeRouter,
    sessions: LiveQuerySessions,
    sampler: RandomSampler,
    grouper: DuplicateGrouper,
    tags: TagService,
}

impl StoryEngine {
    /// Subscribe to the store's change feed and wire up every component.
    pub async fn start(store: Arc<dyn StoryStore>, config: EngineConfig) -> Self {
        let worker = StoreWorker::new(store);
        let router = ChangeRouter::start(worker.clone(), config.debounce()).await;
        let sessions = LiveQuerySessions::new(worker.clone(), router.clone(), config.debounce());
        let sampler = RandomSampler::new(worker.clone(), config.sample_seed);
        let grouper = DuplicateGrouper::new(worker.clone());
        let tags = TagService::new(worker.clone());
        tracing::info!(
            debounce_ms = config.debounce_ms,
            feed = ?router.status(),
            "story engine started"
        );
        Self {
            config,
            worker,
            router,
            sessions,
            sampler,
            grouper,
            tags,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Compiler

    pub fn compile(&self, options: &FilterOptions) -> Result<StoryQuery> {
        compiler::compile(options)
    }

    pub async fn count(&self, options: &FilterOptions) -> Result<usize> {
        let query = compiler::compile(options)?;
        self.worker.run(move |s| s.count(&query.predicate)).await
    }

    // Sessions

    /// Compile `options` and open a live session over the result.
    pub async fn open_session(&self, options: &FilterOptions) -> Result<SessionHandle> {
        let query = compiler::compile(options)?;
        self.sessions.open(query).await
    }

    pub async fn open_query(&self, query: StoryQuery) -> Result<SessionHandle> {
        self.sessions.open(query).await
    }

    pub fn current_results(&self, handle: SessionHandle) -> Result<Arc<Vec<Story>>> {
        self.sessions.current_results(handle)
    }

    pub async fn refresh(&self, handle: SessionHandle) -> Result<()> {
        self.sessions.refresh(handle).await
    }

    pub fn watch_session(&self, handle: SessionHandle) -> Result<watch::Receiver<ResultsSnapshot>> {
        self.sessions.watch(handle)
    }

    pub fn close_session(&self, handle: SessionHandle) -> Result<()> {
        self.sessions.close(handle)
    }

    pub fn sessions(&self) -> &LiveQuerySessions {
        &self.sessions
    }

    // Sampling

    pub async fn sample(&self, k: usize) -> Result<Vec<StoryId>> {
        self.sampler.sample(k).await
    }

    pub async fn sample_one(&self) -> Result<Option<StoryId>> {
        self.sampler.sample_one().await
    }

    pub async fn sample_one_excluding(&self, current: Option<StoryId>) -> Result<Option<StoryId>> {
        self.sampler.sample_one_excluding(current).await
    }

    pub async fn sample_stories(&self, k: usize) -> Result<Vec<Story>> {
        self.sampler.sample_stories(k).await
    }

    // Duplicates

    pub async fn group_by(
        &self,
        field: GroupableField,
        min_count: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        self.grouper.group_by(field, min_count).await
    }

    /// Groups using the configured minimum size.
    pub async fn duplicates(&self, field: GroupableField) -> Result<Vec<DuplicateGroup>> {
        self.grouper
            .group_by(field, self.config.default_min_duplicates)
            .await
    }

    pub async fn duplicate_members(&self, key: &GroupKey) -> Result<Vec<Story>> {
        self.grouper.members(key).await
    }

    pub async fn stories_without(&self, field: GroupableField) -> Result<Vec<Story>> {
        self.grouper.without_value(field).await
    }

    /// A duplicate view refreshed on every relevant store change.
    pub async fn open_duplicate_view(
        &self,
        field: GroupableField,
        min_count: Option<usize>,
    ) -> Result<DuplicateView> {
        DuplicateView::open(
            self.worker.clone(),
            self.router.clone(),
            field,
            min_count.unwrap_or(self.config.default_min_duplicates),
            self.config.debounce(),
        )
        .await
    }

    // Tags

    pub fn tags(&self) -> &TagService {
        &self.tags
    }

    pub async fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        self.tags.get_or_create(name).await
    }

    pub async fn all_tags(&self) -> Result<Vec<Tag>> {
        self.tags.all().await
    }

    pub async fn rename_tag(&self, id: TagId, name: &str) -> Result<()> {
        self.tags.rename(id, name).await
    }

    pub async fn delete_tag_with_stories(&self, name: &str) -> Result<usize> {
        self.tags.delete_with_stories(name).await
    }

    // Stories

    pub async fn story(&self, id: StoryId) -> Result<Option<Story>> {
        self.worker.run(move |s| s.get(id)).await
    }

    pub async fn insert_story(&self, story: Story) -> Result<StoryId> {
        self.worker.run(move |s| s.insert(story)).await
    }

    pub async fn update_story(&self, id: StoryId, mutations: Vec<StoryMutation>) -> Result<()> {
        self.worker.run(move |s| s.update(id, mutations)).await
    }

    pub async fn set_favorite(&self, id: StoryId, favorite: bool) -> Result<()> {
        self.update_story(id, vec![StoryMutation::SetFavorite(favorite)])
            .await
    }

    pub async fn delete_story(&self, id: StoryId) -> Result<()> {
        self.worker.run(move |s| s.delete(id)).await
    }

    // Feed

    pub fn feed_status(&self) -> FeedStatus {
        self.router.status()
    }

    pub fn watch_feed(&self) -> watch::Receiver<FeedStatus> {
        self.router.watch_status()
    }

    /// Close every session and drop the store subscription.
    pub async fn shutdown(&self) {
        self.sessions.close_all();
        self.router.shutdown().await;
        tracing::info!("story engine stopped");
    }
}
