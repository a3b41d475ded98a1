//! Duplicate detection by shared field value.
//!
//! Grouping runs as one aggregation query that returns only `(value, count)`
//! pairs. Members of a group are fetched lazily with an equality query, and
//! stories with no value for the field are reached through a separate
//! `IS NULL` query, never through the grouping itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use story_core::{Aggregation, Field, Predicate, SortField, SortKey, Story, StoryQuery, Value};
use tokio::sync::watch;

use crate::error::{EngineError, Result};
use crate::live::{LiveView, Snapshot};
use crate::router::{ChangeRouter, ObserverId};
use crate::session::SessionHandle;
use crate::worker::StoreWorker;

/// Fields stories can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupableField {
    Timestamp,
    Text,
}

impl GroupableField {
    pub fn field(self) -> Field {
        match self {
            GroupableField::Timestamp => Field::Timestamp,
            GroupableField::Text => Field::Text,
        }
    }

    fn sort_field(self) -> SortField {
        match self {
            GroupableField::Timestamp => SortField::Timestamp,
            GroupableField::Text => SortField::Text,
        }
    }
}

/// The value shared by every member of a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupKey {
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl GroupKey {
    /// Interpret an aggregated value as a key for `field`.
    pub fn from_value(field: GroupableField, value: &Value) -> Option<GroupKey> {
        match field {
            GroupableField::Timestamp => value.as_timestamp().map(GroupKey::Timestamp),
            GroupableField::Text => value.as_text().map(|t| GroupKey::Text(t.to_string())),
        }
    }

    pub fn field(&self) -> GroupableField {
        match self {
            GroupKey::Timestamp(_) => GroupableField::Timestamp,
            GroupKey::Text(_) => GroupableField::Text,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            GroupKey::Timestamp(t) => Value::Timestamp(*t),
            GroupKey::Text(t) => Value::Text(t.clone()),
        }
    }
}

/// A set of stories sharing one field value. Members are not materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub key: GroupKey,
    pub count: usize,
}

/// Query for the members of a group, ordered by the other groupable field.
pub fn members_query(key: &GroupKey) -> StoryQuery {
    let field = key.field();
    StoryQuery {
        predicate: Predicate::Eq(field.field(), key.to_value()),
        sort: vec![SortKey {
            field: field.sort_field().other(),
            ascending: true,
        }],
        limit: None,
    }
}

/// Query for stories with no value for `field`.
pub fn without_value_query(field: GroupableField) -> StoryQuery {
    StoryQuery {
        predicate: Predicate::IsNull(field.field()),
        sort: vec![SortKey {
            field: field.sort_field().other(),
            ascending: true,
        }],
        limit: None,
    }
}

/// Keep a selected group key only if it still names a group.
///
/// Returns `None` once the duplicate has been resolved, which tells the
/// caller to clear its selection.
pub fn reconcile_selection(
    groups: &[DuplicateGroup],
    selected: Option<&GroupKey>,
) -> Option<GroupKey> {
    let selected = selected?;
    groups
        .iter()
        .find(|g| &g.key == selected)
        .map(|g| g.key.clone())
}

/// Stateless grouping queries.
#[derive(Clone)]
pub struct DuplicateGrouper {
    worker: StoreWorker,
}

impl DuplicateGrouper {
    pub fn new(worker: StoreWorker) -> Self {
        Self { worker }
    }

    /// Groups of at least `min_count` stories sharing a value of `field`,
    /// sorted by that value descending.
    pub async fn group_by(
        &self,
        field: GroupableField,
        min_count: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        fetch_groups(&self.worker, field, min_count).await
    }

    pub async fn members(&self, key: &GroupKey) -> Result<Vec<Story>> {
        let query = members_query(key);
        self.worker.run(move |s| s.fetch(&query)).await
    }

    pub async fn without_value(&self, field: GroupableField) -> Result<Vec<Story>> {
        let query = without_value_query(field);
        self.worker.run(move |s| s.fetch(&query)).await
    }
}

async fn fetch_groups(
    worker: &StoreWorker,
    field: GroupableField,
    min_count: usize,
) -> Result<Vec<DuplicateGroup>> {
    if min_count == 0 {
        return Err(EngineError::InvalidInput(
            "minimum group size must be at least 1".to_string(),
        ));
    }
    let aggregation = Aggregation {
        field: field.field(),
        min_count,
        predicate: Predicate::Always,
    };
    let rows = worker.run(move |s| s.aggregate(&aggregation)).await?;
    let groups: Vec<DuplicateGroup> = rows
        .into_iter()
        .filter_map(|row| {
            GroupKey::from_value(field, &row.key).map(|key| DuplicateGroup {
                key,
                count: row.count,
            })
        })
        .collect();
    tracing::debug!(?field, min_count, groups = groups.len(), "grouped duplicates");
    Ok(groups)
}

/// Published state of a duplicate view.
pub type GroupsSnapshot = Snapshot<Vec<DuplicateGroup>>;

/// Duplicate groups kept current by the change router.
pub struct DuplicateView {
    field: GroupableField,
    min_count: usize,
    view: LiveView<Vec<DuplicateGroup>>,
    router: ChangeRouter,
    observer: ObserverId,
}

impl DuplicateView {
    pub async fn open(
        worker: StoreWorker,
        router: ChangeRouter,
        field: GroupableField,
        min_count: usize,
        debounce: Duration,
    ) -> Result<Self> {
        let view = LiveView::open(SessionHandle::next(), debounce, move || {
            let worker = worker.clone();
            async move { fetch_groups(&worker, field, min_count).await }
        })
        .await?;
        let observer = router.register(view.target());
        Ok(Self {
            field,
            min_count,
            view,
            router,
            observer,
        })
    }

    pub fn field(&self) -> GroupableField {
        self.field
    }

    pub fn min_count(&self) -> usize {
        self.min_count
    }

    pub fn groups(&self) -> Arc<Vec<DuplicateGroup>> {
        self.view.current()
    }

    pub async fn refresh(&self) -> Result<()> {
        self.view.refresh().await
    }

    pub fn watch(&self) -> watch::Receiver<GroupsSnapshot> {
        self.view.subscribe()
    }

    /// Re-validate a selection against the latest groups.
    pub fn reconcile(&self, selected: Option<&GroupKey>) -> Option<GroupKey> {
        reconcile_selection(&self.groups(), selected)
    }

    pub fn close(&self) {
        self.router.unregister(self.observer);
        self.view.close();
    }
}

impl Drop for DuplicateView {
    fn drop(&mut self) {
        self.router.unregister(self.observer);
    }
}
