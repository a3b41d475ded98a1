use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::ChangeEvent;
use crate::query::{Aggregation, GroupCount, Predicate, Row, StoryQuery};
use crate::story::{Field, Story, StoryId, Tag, TagId};

/// Mutation to apply to a story's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoryMutation {
    SetText(String),
    SetTimestamp(Option<DateTime<Utc>>),
    SetFavorite(bool),
    SetReminder(Option<String>),
    AddTag(Tag),
    RemoveTag(String),
    SetTags(Vec<Tag>),
}

impl StoryMutation {
    /// Apply to an in-memory story, keeping the tag invariant.
    pub fn apply(&self, story: &mut Story) {
        match self {
            StoryMutation::SetText(text) => story.text = text.clone(),
            StoryMutation::SetTimestamp(ts) => story.timestamp = *ts,
            StoryMutation::SetFavorite(v) => story.is_favorite = *v,
            StoryMutation::SetReminder(r) => story.reminder = r.clone(),
            StoryMutation::AddTag(tag) => {
                if !story.has_tag(&tag.name) {
                    story.tags.push(tag.clone());
                    story.normalize_tags();
                }
            }
            StoryMutation::RemoveTag(name) => story.tags.retain(|t| &t.name != name),
            StoryMutation::SetTags(tags) => {
                story.tags = tags.clone();
                story.normalize_tags();
            }
        }
    }
}

/// Identifies one change-feed subscription.
pub type SubscriptionId = u64;

/// Change-feed callback. Called after the mutation has committed, never
/// while the store holds its own locks.
pub type ChangeCallback = Box<dyn Fn(ChangeEvent) + Send + Sync>;

/// The trait that all storage backends implement.
///
/// Every method is independently atomic; no multi-call transactions are
/// assumed by callers.
pub trait StoryStore: Send + Sync {
    /// Insert a new story. Returns its ID.
    fn insert(&self, story: Story) -> Result<StoryId, StoreError>;

    /// Get a story by ID.
    fn get(&self, id: StoryId) -> Result<Option<Story>, StoreError>;

    /// Apply mutations to an existing story.
    fn update(&self, id: StoryId, mutations: Vec<StoryMutation>) -> Result<(), StoreError>;

    /// Delete a story by ID.
    fn delete(&self, id: StoryId) -> Result<(), StoreError>;

    /// Fetch full stories matching a query, sorted and limited.
    fn fetch(&self, q: &StoryQuery) -> Result<Vec<Story>, StoreError>;

    /// Count stories matching a predicate without fetching them.
    fn count(&self, predicate: &Predicate) -> Result<usize, StoreError>;

    /// Fetch only the requested fields of matching stories.
    fn project(&self, predicate: &Predicate, fields: &[Field]) -> Result<Vec<Row>, StoreError>;

    /// Group matching stories by a field and count each group.
    ///
    /// Only groups with `count >= min_count` are returned, sorted by key
    /// descending. Stories with no value for the field are never grouped.
    fn aggregate(&self, q: &Aggregation) -> Result<Vec<GroupCount>, StoreError>;

    /// Return the tag with this name, inserting it first if absent.
    ///
    /// Must be atomic: two calls with the same new name yield one tag.
    fn find_or_create_tag(&self, name: &str) -> Result<Tag, StoreError>;

    /// All tags, sorted by name.
    fn tags(&self) -> Result<Vec<Tag>, StoreError>;

    /// Rename a tag. Fails with `AlreadyExists` if the name is taken.
    fn rename_tag(&self, id: TagId, name: &str) -> Result<(), StoreError>;

    /// Delete a tag and detach it from every story carrying it.
    fn delete_tag(&self, id: TagId) -> Result<(), StoreError>;

    /// Register a change-feed callback.
    fn subscribe(&self, on_change: ChangeCallback) -> Result<SubscriptionId, StoreError>;

    /// Drop a change-feed callback.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError>;
}

/// Errors from the story store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
