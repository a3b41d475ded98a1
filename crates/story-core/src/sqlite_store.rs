use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::event::{ChangeEvent, ChangeOp};
use crate::query::{Aggregation, GroupCount, Predicate, Row, StoryQuery};
use crate::sql_query::{compile_aggregation, compile_query, compile_where, field_to_column};
use crate::store::{ChangeCallback, StoreError, StoryMutation, StoryStore, SubscriptionId};
use crate::story::{Field, Story, StoryId, Tag, TagId, Value};
use crate::text::fold_for_search;

type Listener = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

const STORY_COLUMNS: &str = "id, text, timestamp, is_favorite, reminder";

/// SQLite-backed implementation of the StoryStore trait.
pub struct SqliteStoryStore {
    conn: Mutex<Connection>,
    listeners: Mutex<BTreeMap<SubscriptionId, Listener>>,
    next_subscription: AtomicU64,
}

impl SqliteStoryStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn =
            Connection::open(path).map_err(|e| StoreError::Unavailable(format!("open: {}", e)))?;
        Self::init_with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            listeners: Mutex::new(BTreeMap::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS stories (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                search_text TEXT NOT NULL,
                timestamp INTEGER,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                reminder TEXT
            );

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS story_tags (
                story_id TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (story_id, tag_id)
            );

            CREATE INDEX IF NOT EXISTS idx_stories_timestamp ON stories(timestamp);
            CREATE INDEX IF NOT EXISTS idx_stories_text ON stories(text);
            CREATE INDEX IF NOT EXISTS idx_stories_favorite ON stories(is_favorite);
            CREATE INDEX IF NOT EXISTS idx_story_tags_tag ON story_tags(tag_id);
            ",
        )
        .map_err(|e| StoreError::Storage(format!("init_schema: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))
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

    /// Find a tag by name, inserting it if absent. Returns the tag and
    /// whether it was created.
    fn ensure_tag(conn: &Connection, name: &str) -> Result<(Tag, bool), StoreError> {
        let created = conn
            .execute(
                "INSERT INTO tags (id, name) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
                params![TagId::new_v4().to_string(), name],
            )
            .map_err(|e| StoreError::Storage(format!("insert tag: {}", e)))?
            == 1;
        let id_str: String = conn
            .query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .map_err(|e| StoreError::Storage(format!("select tag: {}", e)))?;
        let tag = Tag {
            id: parse_uuid(&id_str)?,
            name: name.to_string(),
        };
        Ok((tag, created))
    }

    /// Insert or overwrite a story row and its tag links.
    fn write_story(conn: &Connection, story: &Story, replace: bool) -> Result<Vec<TagId>, StoreError> {
        let id_str = story.id.to_string();
        let timestamp = story
            .timestamp
            .map(|t| {
                t.timestamp_nanos_opt().ok_or_else(|| {
                    StoreError::Validation(format!("timestamp out of storable range: {}", t))
                })
            })
            .transpose()?;
        let search_text = fold_for_search(&story.text);

        if replace {
            conn.execute(
                "UPDATE stories SET text = ?2, search_text = ?3, timestamp = ?4, is_favorite = ?5, reminder = ?6
                 WHERE id = ?1",
                params![
                    id_str,
                    story.text,
                    search_text,
                    timestamp,
                    story.is_favorite as i32,
                    story.reminder,
                ],
            )
            .map_err(|e| StoreError::Storage(format!("update: {}", e)))?;
            conn.execute("DELETE FROM story_tags WHERE story_id = ?1", params![id_str])
                .map_err(|e| StoreError::Storage(format!("clear tags: {}", e)))?;
        } else {
            conn.execute(
                "INSERT INTO stories (id, text, search_text, timestamp, is_favorite, reminder)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id_str,
                    story.text,
                    search_text,
                    timestamp,
                    story.is_favorite as i32,
                    story.reminder,
                ],
            )
            .map_err(|e| {
                if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                    if err.code == rusqlite::ErrorCode::ConstraintViolation {
                        return StoreError::AlreadyExists(id_str.clone());
                    }
                }
                StoreError::Storage(format!("insert: {}", e))
            })?;
        }

        let mut created_tags = Vec::new();
        for tag in &story.tags {
            let (stored, created) = Self::ensure_tag(conn, &tag.name)?;
            if created {
                created_tags.push(stored.id);
            }
            conn.execute(
                "INSERT OR IGNORE INTO story_tags (story_id, tag_id) VALUES (?1, ?2)",
                params![id_str, stored.id.to_string()],
            )
            .map_err(|e| StoreError::Storage(format!("insert story tag: {}", e)))?;
        }
        Ok(created_tags)
    }

    fn load_tags(conn: &Connection, story_id: &str) -> Result<Vec<Tag>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.name FROM story_tags st JOIN tags t ON t.id = st.tag_id
                 WHERE st.story_id = ?1 ORDER BY t.name",
            )
            .map_err(|e| StoreError::Storage(format!("prepare tags: {}", e)))?;
        let rows = stmt
            .query_map(params![story_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| StoreError::Storage(format!("query tags: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect tags: {}", e)))?;
        rows.into_iter()
            .map(|(id, name)| parse_uuid(&id).map(|id| Tag { id, name }))
            .collect()
    }

    fn load_stories(
        conn: &Connection,
        sql: &str,
        params: &[rusqlite::types::Value],
    ) -> Result<Vec<Story>, StoreError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StoreError::Storage(format!("prepare fetch: {}", e)))?;
        let raw = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(|e| StoreError::Storage(format!("query fetch: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect fetch: {}", e)))?;

        let mut stories = Vec::with_capacity(raw.len());
        for (id_str, text, timestamp, is_favorite, reminder) in raw {
            let tags = Self::load_tags(conn, &id_str)?;
            stories.push(Story {
                id: parse_uuid(&id_str)?,
                text,
                timestamp: timestamp.map(nanos_to_datetime),
                tags,
                is_favorite,
                reminder,
            });
        }
        Ok(stories)
    }

    fn get_with(conn: &Connection, id: StoryId) -> Result<Option<Story>, StoreError> {
        let sql = format!("SELECT {} FROM stories WHERE id = ?", STORY_COLUMNS);
        let mut stories = Self::load_stories(
            conn,
            &sql,
            &[rusqlite::types::Value::Text(id.to_string())],
        )?;
        Ok(stories.pop())
    }

    fn stories_with_tag(conn: &Connection, id: TagId) -> Result<Vec<StoryId>, StoreError> {
        let mut stmt = conn
            .prepare("SELECT story_id FROM story_tags WHERE tag_id = ?1")
            .map_err(|e| StoreError::Storage(format!("prepare tagged: {}", e)))?;
        let ids = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::Storage(format!("query tagged: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect tagged: {}", e)))?;
        ids.iter().map(|s| parse_uuid(s)).collect()
    }

    fn tag_exists(conn: &Connection, id: TagId) -> Result<bool, StoreError> {
        conn.query_row(
            "SELECT 1 FROM tags WHERE id = ?1",
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(|e| StoreError::Storage(format!("select tag: {}", e)))
    }

    fn emit_created_tags(&self, created: Vec<TagId>) {
        for id in created {
            self.emit(ChangeEvent::tag(ChangeOp::Insert, id));
        }
    }
}

impl StoryStore for SqliteStoryStore {
    fn insert(&self, story: Story) -> Result<StoryId, StoreError> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Storage(format!("begin tx: {}", e)))?;
        let created = Self::write_story(&tx, &story, false)?;
        tx.commit()
            .map_err(|e| StoreError::Storage(format!("commit: {}", e)))?;
        drop(conn);

        self.emit_created_tags(created);
        self.emit(ChangeEvent::story(ChangeOp::Insert, vec![story.id]));
        Ok(story.id)
    }

    fn get(&self, id: StoryId) -> Result<Option<Story>, StoreError> {
        let conn = self.lock()?;
        Self::get_with(&conn, id)
    }

    fn update(&self, id: StoryId, mutations: Vec<StoryMutation>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Storage(format!("begin tx: {}", e)))?;
        let mut story = Self::get_with(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        for m in &mutations {
            m.apply(&mut story);
        }
        let created = Self::write_story(&tx, &story, true)?;
        tx.commit()
            .map_err(|e| StoreError::Storage(format!("commit: {}", e)))?;
        drop(conn);

        self.emit_created_tags(created);
        self.emit(ChangeEvent::story(ChangeOp::Update, vec![id]));
        Ok(())
    }

    fn delete(&self, id: StoryId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM stories WHERE id = ?1", params![id.to_string()])
            .map_err(|e| StoreError::Storage(format!("delete: {}", e)))?;
        drop(conn);
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.emit(ChangeEvent::story(ChangeOp::Delete, vec![id]));
        Ok(())
    }

    fn fetch(&self, q: &StoryQuery) -> Result<Vec<Story>, StoreError> {
        let conn = self.lock()?;
        let compiled = compile_query(q);
        let sql = format!(
            "SELECT {} FROM stories {} {} {}",
            STORY_COLUMNS, compiled.where_clause, compiled.order_clause, compiled.limit
        );
        Self::load_stories(&conn, &sql, &compiled.params)
    }

    fn count(&self, predicate: &Predicate) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let (where_clause, params) = compile_where(predicate);
        let sql = format!("SELECT COUNT(*) FROM stories {}", where_clause);
        let count: i64 = conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(|e| StoreError::Storage(format!("count: {}", e)))?;
        Ok(count as usize)
    }

    fn project(&self, predicate: &Predicate, fields: &[Field]) -> Result<Vec<Row>, StoreError> {
        if fields.is_empty() {
            return Err(StoreError::Validation("projection needs a field".to_string()));
        }
        let conn = self.lock()?;
        let (where_clause, params) = compile_where(predicate);
        let columns: Vec<&str> = fields.iter().map(|f| field_to_column(*f)).collect();
        let sql = format!(
            "SELECT {} FROM stories {} ORDER BY id",
            columns.join(", "),
            where_clause
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Storage(format!("prepare project: {}", e)))?;
        let raw = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..fields.len())
                    .map(|i| row.get::<_, rusqlite::types::Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(|e| StoreError::Storage(format!("query project: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect project: {}", e)))?;

        raw.into_iter()
            .map(|values| {
                fields
                    .iter()
                    .zip(values)
                    .map(|(f, v)| sql_to_value(*f, v).map(|value| (*f, value)))
                    .collect::<Result<Row, StoreError>>()
            })
            .collect()
    }

    fn aggregate(&self, q: &Aggregation) -> Result<Vec<GroupCount>, StoreError> {
        let conn = self.lock()?;
        let (sql, params) = compile_aggregation(q);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Storage(format!("prepare aggregate: {}", e)))?;
        let raw = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, rusqlite::types::Value>(0)?,
                    row.get::<_, i64>(1)?,
                ))
            })
            .map_err(|e| StoreError::Storage(format!("query aggregate: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect aggregate: {}", e)))?;

        raw.into_iter()
            .map(|(key, count)| {
                sql_to_value(q.field, key).map(|key| GroupCount {
                    key,
                    count: count as usize,
                })
            })
            .collect()
    }

    fn find_or_create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let conn = self.lock()?;
        let (tag, created) = Self::ensure_tag(&conn, name)?;
        drop(conn);
        if created {
            self.emit(ChangeEvent::tag(ChangeOp::Insert, tag.id));
        }
        Ok(tag)
    }

    fn tags(&self) -> Result<Vec<Tag>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, name FROM tags ORDER BY name")
            .map_err(|e| StoreError::Storage(format!("prepare tags: {}", e)))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| StoreError::Storage(format!("query tags: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Storage(format!("collect tags: {}", e)))?;
        rows.into_iter()
            .map(|(id, name)| parse_uuid(&id).map(|id| Tag { id, name }))
            .collect()
    }

    fn rename_tag(&self, id: TagId, name: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if !Self::tag_exists(&conn, id)? {
            return Err(StoreError::NotFound(id));
        }
        conn.execute(
            "UPDATE tags SET name = ?2 WHERE id = ?1",
            params![id.to_string(), name],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.code == rusqlite::ErrorCode::ConstraintViolation {
                    return StoreError::AlreadyExists(name.to_string());
                }
            }
            StoreError::Storage(format!("rename tag: {}", e))
        })?;
        let affected = Self::stories_with_tag(&conn, id)?;
        drop(conn);

        self.emit(ChangeEvent::tag(ChangeOp::Update, id));
        if !affected.is_empty() {
            self.emit(ChangeEvent::story(ChangeOp::Update, affected));
        }
        Ok(())
    }

    fn delete_tag(&self, id: TagId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let affected = Self::stories_with_tag(&conn, id)?;
        let changed = conn
            .execute("DELETE FROM tags WHERE id = ?1", params![id.to_string()])
            .map_err(|e| StoreError::Storage(format!("delete tag: {}", e)))?;
        drop(conn);
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }

        self.emit(ChangeEvent::tag(ChangeOp::Delete, id));
        if !affected.is_empty() {
            self.emit(ChangeEvent::story(ChangeOp::Update, affected));
        }
        Ok(())
    }

    fn subscribe(&self, on_change: ChangeCallback) -> Result<SubscriptionId, StoreError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .insert(id, Arc::from(on_change));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.listeners
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .remove(&id);
        Ok(())
    }
}

fn parse_uuid(s: &str) -> Result<uuid::Uuid, StoreError> {
    uuid::Uuid::parse_str(s).map_err(|e| StoreError::Storage(format!("parse id: {}", e)))
}

/// Timestamps are stored as nanoseconds since the epoch.
fn nanos_to_datetime(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

/// Convert a raw column value back into the field's story Value.
fn sql_to_value(field: Field, raw: rusqlite::types::Value) -> Result<Value, StoreError> {
    use rusqlite::types::Value as SqlValue;
    Ok(match (field, raw) {
        (_, SqlValue::Null) => Value::Null,
        (Field::Id, SqlValue::Text(s)) => Value::Id(parse_uuid(&s)?),
        (Field::Timestamp, SqlValue::Integer(ns)) => Value::Timestamp(nanos_to_datetime(ns)),
        (Field::IsFavorite, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (_, SqlValue::Text(s)) => Value::Text(s),
        (_, SqlValue::Integer(i)) => Value::Int(i),
        (f, other) => {
            return Err(StoreError::Storage(format!(
                "unexpected column value for {:?}: {:?}",
                f, other
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SortField, SortKey};
    use std::sync::mpsc;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, 8, 30, 0).unwrap()
    }

    #[test]
    fn insert_and_get_round_trip() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let story = Story::new("Grandpa and the boat")
            .with_timestamp(day(3))
            .with_tags(vec![Tag::new("family"), Tag::new("sea")])
            .with_reminder("cal-42")
            .favorite();
        let id = store.insert(story.clone()).unwrap();
        let got = store.get(id).unwrap().unwrap();
        assert_eq!(got.text, story.text);
        assert_eq!(got.timestamp, Some(day(3)));
        assert_eq!(got.tag_names(), vec!["family", "sea"]);
        assert!(got.is_favorite);
        assert_eq!(got.reminder.as_deref(), Some("cal-42"));
    }

    #[test]
    fn sub_millisecond_timestamps_stay_distinct() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let t = day(5) + chrono::Duration::nanoseconds(123_456_789);
        let later = t + chrono::Duration::microseconds(500);
        let id = store.insert(Story::new("first").with_timestamp(t)).unwrap();
        store.insert(Story::new("second").with_timestamp(later)).unwrap();

        assert_eq!(store.get(id).unwrap().unwrap().timestamp, Some(t));
        assert_eq!(
            store
                .count(&Predicate::Eq(Field::Timestamp, Value::Timestamp(t)))
                .unwrap(),
            1
        );
        let groups = store
            .aggregate(&Aggregation {
                field: Field::Timestamp,
                min_count: 2,
                predicate: Predicate::Always,
            })
            .unwrap();
        assert!(groups.is_empty());

        let rows = store.project(&Predicate::Always, &[Field::Timestamp]).unwrap();
        let mut stamps: Vec<Value> = rows
            .into_iter()
            .filter_map(|mut r| r.remove(&Field::Timestamp))
            .collect();
        stamps.sort();
        assert_eq!(stamps, vec![Value::Timestamp(t), Value::Timestamp(later)]);
    }

    #[test]
    fn insert_duplicate_fails() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let story = Story::new("x");
        store.insert(story.clone()).unwrap();
        let err = store.insert(story).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let a = store.find_or_create_tag("work").unwrap();
        let b = store.find_or_create_tag("work").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.tags().unwrap().len(), 1);
    }

    #[test]
    fn contains_is_case_and_accent_insensitive() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        store.insert(Story::new("Summer in Zürich")).unwrap();
        store.insert(Story::new("Winter in Oslo")).unwrap();
        let q = StoryQuery::matching(Predicate::Contains(Field::Text, "ZURICH".into()));
        let results = store.fetch(&q).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Summer in Zürich");
    }

    #[test]
    fn query_has_tag_and_favorites() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        store
            .insert(Story::new("a").with_tags(vec![Tag::new("x")]).favorite())
            .unwrap();
        store
            .insert(Story::new("b").with_tags(vec![Tag::new("y")]))
            .unwrap();
        store.insert(Story::new("c")).unwrap();

        let q = StoryQuery::matching(Predicate::any(vec![
            Predicate::HasTag("x".into()),
            Predicate::HasTag("y".into()),
        ]));
        assert_eq!(store.fetch(&q).unwrap().len(), 2);

        let fav = Predicate::Eq(Field::IsFavorite, Value::Bool(false));
        assert_eq!(store.count(&fav).unwrap(), 2);
    }

    #[test]
    fn fetch_orders_with_secondary_key() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        store.insert(Story::new("b").with_timestamp(day(1))).unwrap();
        store.insert(Story::new("a").with_timestamp(day(1))).unwrap();
        store.insert(Story::new("c")).unwrap();
        let q = StoryQuery {
            predicate: Predicate::Always,
            sort: vec![
                SortKey {
                    field: SortField::Timestamp,
                    ascending: true,
                },
                SortKey {
                    field: SortField::Text,
                    ascending: true,
                },
            ],
            limit: None,
        };
        let texts: Vec<String> = store.fetch(&q).unwrap().into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["c", "a", "b"]);
    }

    #[test]
    fn aggregate_groups_timestamps() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        store.insert(Story::new("1").with_timestamp(day(1))).unwrap();
        store.insert(Story::new("2").with_timestamp(day(1))).unwrap();
        store.insert(Story::new("3").with_timestamp(day(2))).unwrap();
        store.insert(Story::new("4")).unwrap();
        store.insert(Story::new("5")).unwrap();

        let groups = store
            .aggregate(&Aggregation {
                field: Field::Timestamp,
                min_count: 2,
                predicate: Predicate::Always,
            })
            .unwrap();
        assert_eq!(
            groups,
            vec![GroupCount {
                key: Value::Timestamp(day(1)),
                count: 2
            }]
        );
    }

    #[test]
    fn project_ids_only() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let id = store.insert(Story::new("x")).unwrap();
        let rows = store.project(&Predicate::Always, &[Field::Id]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&Field::Id), Some(&Value::Id(id)));
        assert!(store.project(&Predicate::Always, &[]).is_err());
    }

    #[test]
    fn update_rewrites_fields_and_tags() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let id = store
            .insert(Story::new("draft").with_tags(vec![Tag::new("a")]))
            .unwrap();
        store
            .update(
                id,
                vec![
                    StoryMutation::SetText("Final Café".into()),
                    StoryMutation::AddTag(Tag::new("b")),
                    StoryMutation::RemoveTag("a".into()),
                    StoryMutation::SetTimestamp(Some(day(9))),
                ],
            )
            .unwrap();
        let got = store.get(id).unwrap().unwrap();
        assert_eq!(got.text, "Final Café");
        assert_eq!(got.tag_names(), vec!["b"]);
        assert_eq!(got.timestamp, Some(day(9)));

        let q = StoryQuery::matching(Predicate::Contains(Field::Text, "cafe".into()));
        assert_eq!(store.fetch(&q).unwrap().len(), 1);
    }

    #[test]
    fn contains_on_reminder_matches_nothing() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        store
            .insert(Story::new("plain").with_reminder("Café at noon"))
            .unwrap();
        for needle in ["cafe", "Café"] {
            let pred = Predicate::Contains(Field::Reminder, needle.into());
            assert_eq!(store.count(&pred).unwrap(), 0);
        }
    }

    #[test]
    fn delete_tag_cascades_links() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let id = store
            .insert(Story::new("x").with_tags(vec![Tag::new("gone")]))
            .unwrap();
        let tag = store.find_or_create_tag("gone").unwrap();
        store.delete_tag(tag.id).unwrap();
        assert!(store.get(id).unwrap().unwrap().tags.is_empty());
        assert!(matches!(
            store.delete_tag(tag.id).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn rename_tag_conflict() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let a = store.find_or_create_tag("a").unwrap();
        store.find_or_create_tag("b").unwrap();
        assert!(matches!(
            store.rename_tag(a.id, "b").unwrap_err(),
            StoreError::AlreadyExists(_)
        ));
        store.rename_tag(a.id, "c").unwrap();
        let names: Vec<String> = store.tags().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn event_emission() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        store
            .subscribe(Box::new(move |e| {
                let _ = tx.lock().unwrap().send(e);
            }))
            .unwrap();

        let id = store.insert(Story::new("Event Test")).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event, ChangeEvent::story(ChangeOp::Insert, vec![id]));

        store.delete(id).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.op, ChangeOp::Delete);
    }

    #[test]
    fn delete_nonexistent_fails() {
        let store = SqliteStoryStore::open_in_memory().unwrap();
        let err = store.delete(StoryId::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stories.db");
        {
            let store = SqliteStoryStore::open(&path).unwrap();
            store.insert(Story::new("persisted")).unwrap();
        }
        let store = SqliteStoryStore::open(&path).unwrap();
        assert_eq!(store.count(&Predicate::Always).unwrap(), 1);
    }
}
