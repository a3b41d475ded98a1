//! story-core: the story collection's data model and store contract.
//!
//! Stories are short text items with tags, a favorite flag, an optional
//! timestamp and an optional reminder reference. Queries are typed
//! [`Predicate`] trees; every storage backend implements [`StoryStore`] and
//! translates those trees into its own query form.

pub mod event;
pub mod memory_store;
pub mod query;
pub mod store;
pub mod story;
pub mod text;

#[cfg(feature = "sqlite")]
mod sql_query;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use event::*;
pub use memory_store::MemoryStore;
pub use query::*;
pub use store::*;
pub use story::*;
pub use text::*;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStoryStore;
