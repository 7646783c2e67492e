use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mixgate_common::ProjectId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot of a project's call counter for the current window.
///
/// Stores hand out copies; a snapshot never changes after it is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCounter {
    pub project_id: ProjectId,
    pub count: u64,
    pub last_updated: DateTime<Utc>,
}

impl RateCounter {
    /// A zeroed counter for a freshly provisioned project.
    pub fn new(project_id: ProjectId, now: DateTime<Utc>) -> Self {
        Self {
            project_id,
            count: 0,
            last_updated: now,
        }
    }

    /// Whether the counter was touched within the last `window`.
    ///
    /// A counter older than one window means a scheduled reset did not land.
    pub fn is_current(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.last_updated) <= window
    }
}

/// Outcome of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    /// The counter was below the limit and has been incremented.
    Applied(RateCounter),
    /// The counter had already reached the limit; nothing was written.
    AtLimit(RateCounter),
}

impl Increment {
    pub fn counter(&self) -> &RateCounter {
        match self {
            Increment::Applied(counter) | Increment::AtLimit(counter) => counter,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no rate counter for project {0}")]
    NotFound(ProjectId),

    #[error("rate counter already exists for project {0}")]
    AlreadyExists(ProjectId),

    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt counter row: {0}")]
    Corrupt(String),
}

/// Durable per-project counter storage.
///
/// The store is the only component allowed to mutate counters. Every
/// mutating call is linearizable with respect to the other mutating calls on
/// the same project, and persists before it returns.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the current counter for a project.
    async fn get(&self, project_id: ProjectId) -> Result<RateCounter, StoreError>;

    /// Provision a zeroed counter. Fails with [`StoreError::AlreadyExists`]
    /// if the project already has one.
    async fn create(&self, project_id: ProjectId) -> Result<RateCounter, StoreError>;

    /// Unconditionally add one call to the counter.
    async fn increment(&self, project_id: ProjectId) -> Result<RateCounter, StoreError>;

    /// Add one call only if the counter is strictly below `limit`.
    ///
    /// The comparison and the write happen as one atomic step, so two callers
    /// racing at `limit - 1` cannot both be applied.
    async fn increment_below(
        &self,
        project_id: ProjectId,
        limit: u64,
    ) -> Result<Increment, StoreError>;

    /// Zero a single project's counter.
    async fn reset(&self, project_id: ProjectId) -> Result<RateCounter, StoreError>;

    /// Zero every counter and return how many rows were touched.
    async fn reset_all(&self) -> Result<usize, StoreError>;

    /// Remove a project's counter. Returns `false` if there was none.
    async fn delete(&self, project_id: ProjectId) -> Result<bool, StoreError>;

    /// All counters, ordered by project id.
    async fn list(&self) -> Result<Vec<RateCounter>, StoreError>;
}
