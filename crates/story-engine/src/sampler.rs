//! Uniform random sampling of stories.
//!
//! Two phases: an identifier-only projection of every story (the only store
//! round trip), then a shuffle or single pick in memory. Calls are
//! independent, so repeats across calls are expected.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use story_core::{Field, Predicate, Story, StoryId, StoryQuery, Value};

use crate::error::Result;
use crate::worker::StoreWorker;

pub struct RandomSampler {
    worker: StoreWorker,
    rng: Mutex<StdRng>,
}

impl RandomSampler {
    pub fn new(worker: StoreWorker, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            worker,
            rng: Mutex::new(rng),
        }
    }

    /// Up to `k` distinct story ids drawn uniformly at random.
    ///
    /// Returns every id when the store holds fewer than `k` stories.
    pub async fn sample(&self, k: usize) -> Result<Vec<StoryId>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut ids = self.all_ids().await?;
        self.with_rng(|rng| ids.shuffle(rng));
        ids.truncate(k);
        Ok(ids)
    }

    /// One uniformly chosen id, `None` when the store is empty.
    pub async fn sample_one(&self) -> Result<Option<StoryId>> {
        let ids = self.all_ids().await?;
        Ok(self.with_rng(|rng| ids.choose(rng).copied()))
    }

    /// Like [`sample_one`](Self::sample_one) but never returns `exclude`
    /// unless it is the only story left.
    pub async fn sample_one_excluding(&self, exclude: Option<StoryId>) -> Result<Option<StoryId>> {
        let mut ids = self.all_ids().await?;
        if let Some(current) = exclude {
            if ids.len() > 1 {
                ids.retain(|id| *id != current);
            }
        }
        Ok(self.with_rng(|rng| ids.choose(rng).copied()))
    }

    /// Sample `k` ids, then fetch those stories in sample order.
    pub async fn sample_stories(&self, k: usize) -> Result<Vec<Story>> {
        let ids = self.sample(k).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = StoryQuery::matching(Predicate::In(
            Field::Id,
            ids.iter().copied().map(Value::Id).collect(),
        ));
        let mut stories = self.worker.run(move |s| s.fetch(&query)).await?;

        let position: HashMap<StoryId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        // A story deleted between the two round trips is simply missing.
        stories.sort_by_key(|s| position.get(&s.id).copied().unwrap_or(usize::MAX));
        Ok(stories)
    }

    async fn all_ids(&self) -> Result<Vec<StoryId>> {
        let rows = self
            .worker
            .run(|s| s.project(&Predicate::Always, &[Field::Id]))
            .await?;
        let ids: Vec<StoryId> = rows
            .iter()
            .filter_map(|row| row.get(&Field::Id).and_then(Value::as_id))
            .collect();
        tracing::debug!(count = ids.len(), "projected story ids for sampling");
        Ok(ids)
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *rng)
    }
}
