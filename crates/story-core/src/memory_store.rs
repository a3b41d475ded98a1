use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::event::{ChangeEvent, ChangeOp};
use crate::query::{compare_stories, Aggregation, GroupCount, Predicate, Row, StoryQuery};
use crate::store::{ChangeCallback, StoreError, StoryMutation, StoryStore, SubscriptionId};
use crate::story::{Field, Story, StoryId, Tag, TagId, Value};

type Listener = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Tables {
    stories: HashMap<StoryId, Story>,
    /// Tags keyed by name.
    tags: BTreeMap<String, Tag>,
}

impl Tables {
    /// The stored tag named `name` and whether this call created it.
    fn tag_named(&mut self, name: &str) -> (Tag, bool) {
        if let Some(tag) = self.tags.get(name) {
            return (tag.clone(), false);
        }
        let tag = Tag::new(name);
        self.tags.insert(name.to_string(), tag.clone());
        (tag, true)
    }

    /// Swap caller-supplied tags for the stored tags with the same names.
    /// Returns the ids of tags created along the way.
    fn canonical_tags(&mut self, story: &mut Story) -> Vec<TagId> {
        let mut created = Vec::new();
        let names: Vec<String> = story.tags.iter().map(|t| t.name.clone()).collect();
        story.tags = names
            .iter()
            .map(|n| {
                let (tag, new) = self.tag_named(n);
                if new {
                    created.push(tag.id);
                }
                tag
            })
            .collect();
        story.normalize_tags();
        created
    }

    fn tag_by_id(&self, id: TagId) -> Option<Tag> {
        self.tags.values().find(|t| t.id == id).cloned()
    }
}

/// In-memory implementation of the StoryStore trait.
///
/// Predicates are evaluated with [`Predicate::matches`]. Change events are
/// delivered after the table lock is released.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    listeners: Mutex<BTreeMap<SubscriptionId, Listener>>,
    next_subscription: AtomicU64,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            listeners: Mutex::new(BTreeMap::new()),
            next_subscription: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop every change-feed callback, ending the feed for all subscribers.
    pub fn disconnect_feed(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        self.tables
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn emit_created_tags(&self, created: Vec<TagId>) {
        for id in created {
            self.emit(ChangeEvent::tag(ChangeOp::Insert, id));
        }
    }

    fn emit(&self, event: ChangeEvent) {
        let listeners: Vec<Listener> = match self.listeners.lock() {
            Ok(l) => l.values().cloned().collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(event.clone());
        }
    }

    fn matching<'a>(tables: &'a Tables, predicate: &Predicate) -> Vec<&'a Story> {
        let mut stories: Vec<&Story> = tables
            .stories
            .values()
            .filter(|s| predicate.matches(s))
            .collect();
        // Deterministic base order for ties on every sort key.
        stories.sort_by_key(|s| s.id);
        stories
    }
}

impl StoryStore for MemoryStore {
    fn insert(&self, mut story: Story) -> Result<StoryId, StoreError> {
        let mut tables = self.lock()?;
        if tables.stories.contains_key(&story.id) {
            return Err(StoreError::AlreadyExists(story.id.to_string()));
        }
        let created = tables.canonical_tags(&mut story);
        let id = story.id;
        tables.stories.insert(id, story);
        drop(tables);
        self.emit_created_tags(created);
        self.emit(ChangeEvent::story(ChangeOp::Insert, vec![id]));
        Ok(id)
    }

    fn get(&self, id: StoryId) -> Result<Option<Story>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.stories.get(&id).cloned())
    }

    fn update(&self, id: StoryId, mutations: Vec<StoryMutation>) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let mut story = tables
            .stories
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        for m in &mutations {
            m.apply(&mut story);
        }
        let created = tables.canonical_tags(&mut story);
        tables.stories.insert(id, story);
        drop(tables);
        self.emit_created_tags(created);
        self.emit(ChangeEvent::story(ChangeOp::Update, vec![id]));
        Ok(())
    }

    fn delete(&self, id: StoryId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        tables.stories.remove(&id).ok_or(StoreError::NotFound(id))?;
        drop(tables);
        self.emit(ChangeEvent::story(ChangeOp::Delete, vec![id]));
        Ok(())
    }

    fn fetch(&self, q: &StoryQuery) -> Result<Vec<Story>, StoreError> {
        let tables = self.lock()?;
        let mut stories = Self::matching(&tables, &q.predicate);
        stories.sort_by(|a, b| compare_stories(a, b, &q.sort));
        let limit = q.limit.unwrap_or(usize::MAX);
        Ok(stories.into_iter().take(limit).cloned().collect())
    }

    fn count(&self, predicate: &Predicate) -> Result<usize, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .stories
            .values()
            .filter(|s| predicate.matches(s))
            .count())
    }

    fn project(&self, predicate: &Predicate, fields: &[Field]) -> Result<Vec<Row>, StoreError> {
        let tables = self.lock()?;
        Ok(Self::matching(&tables, predicate)
            .into_iter()
            .map(|s| fields.iter().map(|f| (*f, s.field(*f))).collect())
            .collect())
    }

    fn aggregate(&self, q: &Aggregation) -> Result<Vec<GroupCount>, StoreError> {
        let tables = self.lock()?;
        let mut groups: BTreeMap<Value, usize> = BTreeMap::new();
        for story in tables.stories.values().filter(|s| q.predicate.matches(s)) {
            let key = story.field(q.field);
            if !key.is_null() {
                *groups.entry(key).or_insert(0) += 1;
            }
        }
        Ok(groups
            .into_iter()
            .rev()
            .filter(|(_, count)| *count >= q.min_count)
            .map(|(key, count)| GroupCount { key, count })
            .collect())
    }

    fn find_or_create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let mut tables = self.lock()?;
        let (tag, created) = tables.tag_named(name);
        drop(tables);
        if created {
            self.emit(ChangeEvent::tag(ChangeOp::Insert, tag.id));
        }
        Ok(tag)
    }

    fn tags(&self) -> Result<Vec<Tag>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.tags.values().cloned().collect())
    }

    fn rename_tag(&self, id: TagId, name: &str) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let old = tables.tag_by_id(id).ok_or(StoreError::NotFound(id))?;
        if old.name == name {
            return Ok(());
        }
        if tables.tags.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        tables.tags.remove(&old.name);
        let renamed = Tag {
            id,
            name: name.to_string(),
        };
        tables.tags.insert(name.to_string(), renamed.clone());

        let mut affected = Vec::new();
        for story in tables.stories.values_mut() {
            if let Some(tag) = story.tags.iter_mut().find(|t| t.id == id) {
                *tag = renamed.clone();
                story.normalize_tags();
                affected.push(story.id);
            }
        }
        drop(tables);
        self.emit(ChangeEvent::tag(ChangeOp::Update, id));
        if !affected.is_empty() {
            self.emit(ChangeEvent::story(ChangeOp::Update, affected));
        }
        Ok(())
    }

    fn delete_tag(&self, id: TagId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let tag = tables.tag_by_id(id).ok_or(StoreError::NotFound(id))?;
        tables.tags.remove(&tag.name);

        let mut affected = Vec::new();
        for story in tables.stories.values_mut() {
            let before = story.tags.len();
            story.tags.retain(|t| t.id != id);
            if story.tags.len() != before {
                affected.push(story.id);
            }
        }
        drop(tables);
        self.emit(ChangeEvent::tag(ChangeOp::Delete, id));
        if !affected.is_empty() {
            self.emit(ChangeEvent::story(ChangeOp::Update, affected));
        }
        Ok(())
    }

    fn subscribe(&self, on_change: ChangeCallback) -> Result<SubscriptionId, StoreError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let mut listeners = self
            .listeners
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        listeners.insert(id, Arc::from(on_change));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        let mut listeners = self
            .listeners
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        listeners.remove(&id);
        Ok(())
    }
}
