//! User-facing filter and sort options.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
pub use story_core::SortField;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FavoritesMode {
    #[default]
    All,
    FavoritesOnly,
    NonFavoritesOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderMode {
    #[default]
    All,
    HasReminder,
    NoReminder,
}

/// The filter axes a list view exposes. Every axis is independent; an
/// inactive axis does not filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub favorites: FavoritesMode,
    pub reminders: ReminderMode,
    pub sort_field: SortField,
    pub sort_ascending: bool,
    /// Active once it has at least three characters.
    pub search_text: String,
    /// Tag names; a story matches if it carries any of them. Empty means
    /// no tag filtering.
    pub tags: BTreeSet<String>,
    pub result_limit: Option<i64>,
}

impl Default for FilterOptions {
    /// Newest first, nothing filtered.
    fn default() -> Self {
        Self {
            favorites: FavoritesMode::All,
            reminders: ReminderMode::All,
            sort_field: SortField::Timestamp,
            sort_ascending: false,
            search_text: String::new(),
            tags: BTreeSet::new(),
            result_limit: None,
        }
    }
}

impl FilterOptions {
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search_text = text.into();
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>) -> Self {
        self.tags.insert(name.into());
        self
    }

    pub fn with_favorites(mut self, mode: FavoritesMode) -> Self {
        self.favorites = mode;
        self
    }

    pub fn with_reminders(mut self, mode: ReminderMode) -> Self {
        self.reminders = mode;
        self
    }

    pub fn sorted_by(mut self, field: SortField, ascending: bool) -> Self {
        self.sort_field = field;
        self.sort_ascending = ascending;
        self
    }

    pub fn limited_to(mut self, limit: i64) -> Self {
        self.result_limit = Some(limit);
        self
    }
}
