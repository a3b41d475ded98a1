use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::story::{Field, Story, Value};
use crate::text::folded_contains;

/// A query against the story store.
///
/// Produced by the engine's filter compiler; stores translate the predicate
/// tree into their native query form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryQuery {
    pub predicate: Predicate,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
}

impl Default for StoryQuery {
    fn default() -> Self {
        Self {
            predicate: Predicate::Always,
            sort: Vec::new(),
            limit: None,
        }
    }
}

impl StoryQuery {
    pub fn matching(predicate: Predicate) -> Self {
        Self {
            predicate,
            ..Default::default()
        }
    }
}

/// Filter predicate over a story's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Always,

    // Field comparisons
    Eq(Field, Value),
    /// Case- and diacritic-insensitive substring match. Only defined on
    /// [`Field::Text`]; any other field matches nothing.
    Contains(Field, String),
    IsNull(Field),
    In(Field, Vec<Value>),

    // Classification
    HasTag(String),

    // Logical
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Conjunction that drops `Always` parts.
    pub fn all(parts: Vec<Predicate>) -> Predicate {
        let mut parts: Vec<Predicate> = parts
            .into_iter()
            .filter(|p| !matches!(p, Predicate::Always))
            .collect();
        match parts.len() {
            0 => Predicate::Always,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    /// Disjunction; a single part is returned unwrapped.
    pub fn any(mut parts: Vec<Predicate>) -> Predicate {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Predicate::Or(parts)
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }

    /// Evaluate against a story in memory.
    pub fn matches(&self, story: &Story) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Eq(field, value) => story.field(*field) == *value,
            Predicate::Contains(Field::Text, needle) => folded_contains(&story.text, needle),
            Predicate::Contains(_, _) => false,
            Predicate::IsNull(field) => story.field(*field).is_null(),
            Predicate::In(field, values) => {
                let v = story.field(*field);
                values.contains(&v)
            }
            Predicate::HasTag(name) => story.has_tag(name),
            Predicate::And(preds) => preds.iter().all(|p| p.matches(story)),
            Predicate::Or(preds) => preds.iter().any(|p| p.matches(story)),
            Predicate::Not(pred) => !pred.matches(story),
        }
    }
}

/// Field a query result can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    Timestamp,
    Text,
}

impl SortField {
    pub fn other(self) -> SortField {
        match self {
            SortField::Timestamp => SortField::Text,
            SortField::Text => SortField::Timestamp,
        }
    }

    pub fn field(self) -> Field {
        match self {
            SortField::Timestamp => Field::Timestamp,
            SortField::Text => Field::Text,
        }
    }
}

/// Sort key for query results, in priority order within a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: SortField,
    pub ascending: bool,
}

/// Order two stories by a list of sort keys.
///
/// Undated stories sort before dated ones when ascending.
pub fn compare_stories(a: &Story, b: &Story, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ord = match key.field {
            SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortField::Text => a.text.cmp(&b.text),
        };
        let ord = if key.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// A projection row: requested field to value.
pub type Row = BTreeMap<Field, Value>;

/// Group-and-count query with a minimum group size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub field: Field,
    pub min_count: usize,
    pub predicate: Predicate,
}

/// One aggregated group: the shared value and how many stories carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub key: Value,
    pub count: usize,
}
