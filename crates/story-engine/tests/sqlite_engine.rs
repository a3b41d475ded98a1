#![cfg(feature = "sqlite")]

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use story_core::{SqliteStoryStore, Story, StoryMutation, Tag};
use story_engine::{
    EngineConfig, FilterOptions, GroupKey, GroupableField, ReminderMode, SortField, StoryEngine,
};

fn engine_config() -> EngineConfig {
    EngineConfig {
        debounce_ms: 10,
        default_min_duplicates: 2,
        sample_seed: Some(3),
    }
}

async fn engine_on_disk(dir: &tempfile::TempDir) -> StoryEngine {
    let store = SqliteStoryStore::open(&dir.path().join("stories.db")).unwrap();
    StoryEngine::start(Arc::new(store), engine_config()).await
}

#[tokio::test]
async fn filters_run_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_on_disk(&dir).await;
    let t = Utc.with_ymd_and_hms(2020, 1, 1, 8, 0, 0).unwrap();

    engine
        .insert_story(
            Story::new("Un café à Paris")
                .with_timestamp(t)
                .with_tags(vec![Tag::new("travel")]),
        )
        .await
        .unwrap();
    engine
        .insert_story(Story::new("Grocery list").with_reminder("rem-1"))
        .await
        .unwrap();
    engine
        .insert_story(Story::new("Cafeteria menu").with_tags(vec![Tag::new("food")]))
        .await
        .unwrap();

    let search = FilterOptions::default()
        .with_search("CAFE")
        .sorted_by(SortField::Text, true);
    let handle = engine.open_session(&search).await.unwrap();
    let texts: Vec<String> = engine
        .current_results(handle)
        .unwrap()
        .iter()
        .map(|s| s.text.clone())
        .collect();
    assert_eq!(texts, vec!["Cafeteria menu", "Un café à Paris"]);

    let tagged = FilterOptions::default().with_tag("travel").with_tag("food");
    assert_eq!(engine.count(&tagged).await.unwrap(), 2);

    let reminders = FilterOptions::default().with_reminders(ReminderMode::HasReminder);
    assert_eq!(engine.count(&reminders).await.unwrap(), 1);

    let limited = FilterOptions::default().limited_to(1);
    let handle = engine.open_session(&limited).await.unwrap();
    assert_eq!(engine.current_results(handle).unwrap().len(), 1);
}

#[tokio::test]
async fn grouping_and_sampling_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_on_disk(&dir).await;
    let t = Utc.with_ymd_and_hms(2020, 6, 1, 8, 0, 0).unwrap();

    let mut ids = HashSet::new();
    for text in ["x", "y", "z"] {
        ids.insert(
            engine
                .insert_story(Story::new(text).with_timestamp(t))
                .await
                .unwrap(),
        );
    }
    ids.insert(engine.insert_story(Story::new("undated")).await.unwrap());

    let groups = engine.group_by(GroupableField::Timestamp, 2).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].key, GroupKey::Timestamp(t));
    assert_eq!(groups[0].count, 3);
    assert_eq!(
        engine
            .stories_without(GroupableField::Timestamp)
            .await
            .unwrap()
            .len(),
        1
    );

    let sampled: HashSet<_> = engine.sample(10).await.unwrap().into_iter().collect();
    assert_eq!(sampled, ids);
}

#[tokio::test]
async fn tag_lifecycle_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_on_disk(&dir).await;

    let work = engine.get_or_create_tag("work").await.unwrap();
    assert_eq!(engine.get_or_create_tag("work").await.unwrap().id, work.id);

    let id = engine.insert_story(Story::new("standup")).await.unwrap();
    engine
        .update_story(id, vec![StoryMutation::AddTag(work.clone())])
        .await
        .unwrap();
    engine.rename_tag(work.id, "job").await.unwrap();
    let story = engine.story(id).await.unwrap().unwrap();
    assert_eq!(story.tag_names(), vec!["job"]);

    assert_eq!(engine.delete_tag_with_stories("job").await.unwrap(), 1);
    assert!(engine.story(id).await.unwrap().is_none());
    assert!(engine.all_tags().await.unwrap().is_empty());
}
