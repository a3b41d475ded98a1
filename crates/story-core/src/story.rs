use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Store-assigned story identifier (UUID v4).
pub type StoryId = Uuid;

/// Tag identifier (UUID v4).
pub type TagId = Uuid;

/// A uniquely named label attachable to stories.
///
/// The name is the tag's natural key: it is unique across all tags and is
/// what tag filters and story tag lists compare on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TagId::new_v4(),
            name: name.into(),
        }
    }
}

/// A short text item in the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub text: String,
    /// `None` means the story has not been dated yet.
    pub timestamp: Option<DateTime<Utc>>,
    /// Ordered by name, never two tags with the same name.
    pub tags: Vec<Tag>,
    pub is_favorite: bool,
    /// Opaque reference into the external calendar.
    pub reminder: Option<String>,
}

impl Story {
    /// An undated, untagged, non-favorite story.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: StoryId::new_v4(),
            text: text.into(),
            timestamp: None,
            tags: Vec::new(),
            is_favorite: false,
            reminder: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self.normalize_tags();
        self
    }

    pub fn favorite(mut self) -> Self {
        self.is_favorite = true;
        self
    }

    pub fn with_reminder(mut self, reminder: impl Into<String>) -> Self {
        self.reminder = Some(reminder.into());
        self
    }

    /// Sort tags by name and drop later entries that repeat a name.
    pub fn normalize_tags(&mut self) {
        // Stable sort keeps the first occurrence of each name in front.
        self.tags.sort_by(|a, b| a.name.cmp(&b.name));
        self.tags.dedup_by(|later, earlier| later.name == earlier.name);
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }

    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|t| t.name.as_str()).collect()
    }

    /// Read a single field as a dynamic value.
    pub fn field(&self, field: Field) -> Value {
        match field {
            Field::Id => Value::Id(self.id),
            Field::Text => Value::Text(self.text.clone()),
            Field::Timestamp => self.timestamp.map(Value::Timestamp).unwrap_or(Value::Null),
            Field::IsFavorite => Value::Bool(self.is_favorite),
            Field::Reminder => self
                .reminder
                .clone()
                .map(Value::Text)
                .unwrap_or(Value::Null),
        }
    }
}

/// Queryable story columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Id,
    Text,
    Timestamp,
    IsFavorite,
    Reminder,
}

/// Dynamic field value used in predicates, projections and group keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Id(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<Uuid> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Text(_) => 4,
            Value::Id(_) => 5,
        }
    }
}

impl Ord for Value {
    /// Null sorts first; values of different kinds order by kind.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Id(a), Value::Id(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}
