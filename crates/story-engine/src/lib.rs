//! story-engine: query compilation, sampling, duplicate detection and live
//! views over a [`story_core::StoryStore`].
//!
//! [`StoryEngine`] is the entry point. It runs every store call on tokio's
//! blocking pool and keeps open sessions and duplicate views current by
//! routing the store's change feed to them.

pub mod compiler;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod filter;
pub mod live;
pub mod router;
pub mod sampler;
pub mod session;
pub mod tags;
pub mod worker;

pub use compiler::{compile, SEARCH_MIN_CHARS};
pub use config::{ConfigError, EngineConfig};
pub use duplicates::{
    reconcile_selection, DuplicateGroup, DuplicateGrouper, DuplicateView, GroupKey,
    GroupableField, GroupsSnapshot,
};
pub use engine::StoryEngine;
pub use error::{EngineError, Result};
pub use filter::{FavoritesMode, FilterOptions, ReminderMode, SortField};
pub use live::{LiveView, Refreshable, Snapshot};
pub use router::{ChangeRouter, FeedStatus, ObserverId};
pub use sampler::RandomSampler;
pub use session::{LiveQuerySessions, ResultsSnapshot, SessionHandle};
pub use tags::TagService;
pub use worker::StoreWorker;
