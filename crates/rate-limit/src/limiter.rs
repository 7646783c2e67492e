use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mixgate_common::ProjectId;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::store::{CounterStore, Increment, StoreError};
use crate::window;

/// The two facts about a project that admission depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectDescriptor {
    pub id: ProjectId,
    pub is_premium: bool,
}

/// Result of a single admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The call is admitted and, for metered projects, has been counted.
    Allowed {
        /// Calls left in the current window. `None` for unmetered projects.
        remaining: Option<u64>,
    },
    /// The project has used its budget for this window. Nothing was counted.
    Rejected {
        reason: String,
        count: u64,
        /// Time until the next scheduled reset.
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Rejected { reason, .. } => Some(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdmitError {
    /// The project exists but was never provisioned with a counter.
    #[error("project {0} has no rate counter provisioned")]
    Configuration(ProjectId),

    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Per-project hourly admission control.
///
/// The limit is "calls since the last top-of-hour reset": the limiter never
/// zeroes counters itself, it relies on the reset job to open a new window.
/// Cloning is cheap and clones share the same store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    calls_per_hour: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, calls_per_hour: u64) -> Self {
        tracing::info!(calls_per_hour, "creating hourly project rate limiter");
        Self {
            store,
            calls_per_hour,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.calls_per_hour
    }

    /// Decide whether `project` may make one more call, counting it if so.
    ///
    /// Premium projects are admitted without touching the store. For
    /// everyone else the compare and the increment are a single store
    /// operation, so concurrent callers can never push a counter past the
    /// threshold.
    pub async fn admit(&self, project: &ProjectDescriptor) -> Result<Decision, AdmitError> {
        if project.is_premium {
            debug!(project_id = %project.id, "premium project admitted unmetered");
            return Ok(Decision::Allowed { remaining: None });
        }

        let outcome = self
            .store
            .increment_below(project.id, self.calls_per_hour)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(id) => {
                    error!(project_id = %id, "project has no rate counter");
                    AdmitError::Configuration(id)
                }
                other => {
                    warn!(project_id = %project.id, error = %other, "counter store failure during admission");
                    AdmitError::StoreUnavailable(other.to_string())
                }
            })?;

        let now = Utc::now();
        if !outcome.counter().is_current(now, window::window_length()) {
            warn!(
                project_id = %project.id,
                last_updated = %outcome.counter().last_updated,
                "counter predates the current window; hourly reset may have been missed"
            );
        }

        match outcome {
            Increment::Applied(counter) => Ok(Decision::Allowed {
                remaining: Some(self.calls_per_hour.saturating_sub(counter.count)),
            }),
            Increment::AtLimit(counter) => {
                debug!(
                    project_id = %project.id,
                    count = counter.count,
                    limit = self.calls_per_hour,
                    "project rate limited"
                );
                Ok(Decision::Rejected {
                    reason: "rate limit exceeded".to_string(),
                    count: counter.count,
                    retry_after: window::until_next_window(now),
                })
            }
        }
    }
}
