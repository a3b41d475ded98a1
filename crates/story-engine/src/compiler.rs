//! Filter options to store query compilation.
//!
//! Pure: the same options always produce the same [`StoryQuery`], whatever
//! the store holds.

use story_core::{Field, Predicate, SortKey, StoryQuery, Value};

use crate::error::{EngineError, Result};
use crate::filter::{FavoritesMode, FilterOptions, ReminderMode};

/// Search text shorter than this (in characters) does not filter.
pub const SEARCH_MIN_CHARS: usize = 3;

/// Compile filter options into a predicate, two sort keys and a limit.
pub fn compile(options: &FilterOptions) -> Result<StoryQuery> {
    let limit = match options.result_limit {
        Some(l) if l < 0 => {
            return Err(EngineError::QueryCompile(format!(
                "result limit must not be negative, got {}",
                l
            )))
        }
        Some(l) => Some(l as usize),
        None => None,
    };

    let predicate = Predicate::all(vec![
        favorites_predicate(options.favorites),
        reminder_predicate(options.reminders),
        tag_predicate(options),
        search_predicate(&options.search_text),
    ]);

    Ok(StoryQuery {
        predicate,
        sort: sort_keys(options),
        limit,
    })
}

fn favorites_predicate(mode: FavoritesMode) -> Predicate {
    match mode {
        FavoritesMode::All => Predicate::Always,
        FavoritesMode::FavoritesOnly => Predicate::Eq(Field::IsFavorite, Value::Bool(true)),
        FavoritesMode::NonFavoritesOnly => Predicate::Eq(Field::IsFavorite, Value::Bool(false)),
    }
}

fn reminder_predicate(mode: ReminderMode) -> Predicate {
    match mode {
        ReminderMode::All => Predicate::Always,
        ReminderMode::HasReminder => Predicate::IsNull(Field::Reminder).negate(),
        ReminderMode::NoReminder => Predicate::IsNull(Field::Reminder),
    }
}

/// Any-of membership; an empty selection leaves the axis inactive.
fn tag_predicate(options: &FilterOptions) -> Predicate {
    if options.tags.is_empty() {
        return Predicate::Always;
    }
    Predicate::any(
        options
            .tags
            .iter()
            .map(|name| Predicate::HasTag(name.clone()))
            .collect(),
    )
}

fn search_predicate(search_text: &str) -> Predicate {
    let needle = search_text.trim();
    if needle.chars().count() < SEARCH_MIN_CHARS {
        return Predicate::Always;
    }
    Predicate::Contains(Field::Text, needle.to_string())
}

/// Primary key as chosen, secondary on the other field in the same
/// direction so ties on the primary field still order deterministically.
fn sort_keys(options: &FilterOptions) -> Vec<SortKey> {
    vec![
        SortKey {
            field: options.sort_field,
            ascending: options.sort_ascending,
        },
        SortKey {
            field: options.sort_field.other(),
            ascending: options.sort_ascending,
        },
    ]
}
