use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mixgate_common::ProjectId;

use crate::store::{CounterStore, Increment, RateCounter, StoreError};

/// In-process counter store.
///
/// Each read-modify-write runs while holding the [`DashMap`] shard lock for
/// the project's key, which serializes concurrent mutations of the same
/// counter without blocking unrelated projects in other shards.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<ProjectId, RateCounter>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, project_id: ProjectId) -> Result<RateCounter, StoreError> {
        self.counters
            .get(&project_id)
            .map(|entry| *entry.value())
            .ok_or(StoreError::NotFound(project_id))
    }

    async fn create(&self, project_id: ProjectId) -> Result<RateCounter, StoreError> {
        match self.counters.entry(project_id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(project_id)),
            Entry::Vacant(slot) => {
                let counter = RateCounter::new(project_id, Utc::now());
                slot.insert(counter);
                Ok(counter)
            }
        }
    }

    async fn increment(&self, project_id: ProjectId) -> Result<RateCounter, StoreError> {
        let mut entry = self
            .counters
            .get_mut(&project_id)
            .ok_or(StoreError::NotFound(project_id))?;
        let counter = entry.value_mut();
        counter.count += 1;
        counter.last_updated = Utc::now();
        Ok(*counter)
    }

    async fn increment_below(
        &self,
        project_id: ProjectId,
        limit: u64,
    ) -> Result<Increment, StoreError> {
        let mut entry = self
            .counters
            .get_mut(&project_id)
            .ok_or(StoreError::NotFound(project_id))?;
        let counter = entry.value_mut();

        if counter.count >= limit {
            return Ok(Increment::AtLimit(*counter));
        }

        counter.count += 1;
        counter.last_updated = Utc::now();
        Ok(Increment::Applied(*counter))
    }

    async fn reset(&self, project_id: ProjectId) -> Result<RateCounter, StoreError> {
        let mut entry = self
            .counters
            .get_mut(&project_id)
            .ok_or(StoreError::NotFound(project_id))?;
        let counter = entry.value_mut();
        counter.count = 0;
        counter.last_updated = Utc::now();
        Ok(*counter)
    }

    async fn reset_all(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut reset = 0;
        for mut entry in self.counters.iter_mut() {
            let counter = entry.value_mut();
            counter.count = 0;
            counter.last_updated = now;
            reset += 1;
        }
        tracing::debug!(reset, "memory counter store reset complete");
        Ok(reset)
    }

    async fn delete(&self, project_id: ProjectId) -> Result<bool, StoreError> {
        Ok(self.counters.remove(&project_id).is_some())
    }

    async fn list(&self) -> Result<Vec<RateCounter>, StoreError> {
        let mut counters: Vec<RateCounter> =
            self.counters.iter().map(|entry| *entry.value()).collect();
        counters.sort_by_key(|c| c.project_id);
        Ok(counters)
    }
}
