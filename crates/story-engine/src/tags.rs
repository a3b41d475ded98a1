//! Tag operations.
//!
//! Every tag write goes through the store's atomic find-or-insert, so a
//! name is never duplicated.

use story_core::{Field, Predicate, Tag, TagId, Value};

use crate::error::{EngineError, Result};
use crate::worker::StoreWorker;

#[derive(Clone)]
pub struct TagService {
    worker: StoreWorker,
}

fn clean_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidInput(
            "tag name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

impl TagService {
    pub fn new(worker: StoreWorker) -> Self {
        Self { worker }
    }

    /// The tag named `name`, created if absent. Surrounding whitespace is
    /// ignored.
    pub async fn get_or_create(&self, name: &str) -> Result<Tag> {
        let name = clean_name(name)?;
        self.worker
            .run(move |s| s.find_or_create_tag(&name))
            .await
    }

    /// All tags, sorted by name.
    pub async fn all(&self) -> Result<Vec<Tag>> {
        self.worker.run(|s| s.tags()).await
    }

    pub async fn rename(&self, id: TagId, new_name: &str) -> Result<()> {
        let name = clean_name(new_name)?;
        self.worker.run(move |s| s.rename_tag(id, &name)).await
    }

    /// Delete every story carrying the tag, then the tag itself.
    ///
    /// Returns the number of stories deleted. Each delete is its own store
    /// call; a failure part way leaves the remaining stories in place.
    pub async fn delete_with_stories(&self, name: &str) -> Result<usize> {
        let name = clean_name(name)?;
        let tag = self
            .all()
            .await?
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| EngineError::NotFound(format!("tag {}", name)))?;

        let deleted = self
            .worker
            .run(move |s| {
                let rows = s.project(&Predicate::HasTag(tag.name.clone()), &[Field::Id])?;
                let ids: Vec<_> = rows
                    .iter()
                    .filter_map(|row| row.get(&Field::Id).and_then(Value::as_id))
                    .collect();
                for id in &ids {
                    s.delete(*id)?;
                }
                s.delete_tag(tag.id)?;
                Ok(ids.len())
            })
            .await?;
        tracing::info!(tag = %name, stories = deleted, "deleted tag with its stories");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use story_core::{MemoryStore, Story, StoryStore};

    fn service() -> (Arc<MemoryStore>, TagService) {
        let store = Arc::new(MemoryStore::new());
        let tags = TagService::new(StoreWorker::new(store.clone()));
        (store, tags)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (_, tags) = service();
        let first = tags.get_or_create("travel").await.unwrap();
        let second = tags.get_or_create("travel").await.unwrap();
        assert_eq!(first.id, second.id);

        let padded = tags.get_or_create("  travel ").await.unwrap();
        assert_eq!(padded.id, first.id);
        assert_eq!(tags.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let (_, tags) = service();
        let err = tags.get_or_create("   ").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_one_tag() {
        let (_, tags) = service();
        let (a, b) = tokio::join!(tags.get_or_create("race"), tags.get_or_create("race"));
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(tags.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_is_sorted_by_name() {
        let (_, tags) = service();
        for name in ["zebra", "apple", "mango"] {
            tags.get_or_create(name).await.unwrap();
        }
        let names: Vec<String> = tags.all().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["apple", "mango", "zebra"]);
    }

    #[tokio::test]
    async fn rename_keeps_identity() {
        let (_, tags) = service();
        let tag = tags.get_or_create("old").await.unwrap();
        tags.rename(tag.id, "new").await.unwrap();
        let renamed = tags.get_or_create("new").await.unwrap();
        assert_eq!(renamed.id, tag.id);
    }

    #[tokio::test]
    async fn delete_with_stories_removes_carriers_only() {
        let (store, tags) = service();
        let doomed = tags.get_or_create("doomed").await.unwrap();
        store
            .insert(Story::new("a").with_tags(vec![doomed.clone()]))
            .unwrap();
        store
            .insert(Story::new("b").with_tags(vec![doomed, Tag::new("keep")]))
            .unwrap();
        store
            .insert(Story::new("c").with_tags(vec![Tag::new("keep")]))
            .unwrap();

        assert_eq!(tags.delete_with_stories("doomed").await.unwrap(), 2);
        assert_eq!(store.count(&Predicate::Always).unwrap(), 1);
        let names: Vec<String> = tags.all().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["keep"]);
    }

    #[tokio::test]
    async fn deleting_unknown_tag_fails() {
        let (_, tags) = service();
        let err = tags.delete_with_stories("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
