use std::sync::Arc;
use std::time::Duration;

use mixgate_common::ProjectId;
use mixgate_rate_limit::{AdmitError, Decision, RateLimiter};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Project;
use crate::registry::ProjectLookup;

/// A project that passed the gate, with the budget left after this call.
#[derive(Debug, Clone)]
pub struct AdmittedProject {
    pub project: Project,
    /// `None` for unmetered (premium) projects.
    pub remaining: Option<u64>,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("{reason}")]
    Rejected { reason: String, retry_after: Duration },

    #[error("project does not exist")]
    ProjectNotFound,

    #[error("project {0} has no analytics credential")]
    ProjectMisconfigured(ProjectId),

    #[error("project {0} has no rate counter provisioned")]
    Configuration(ProjectId),

    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("admission timed out after {0:?}")]
    Timeout(Duration),
}

impl GateError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::Rejected { .. } => "rate_limited",
            GateError::ProjectNotFound => "project_not_found",
            GateError::ProjectMisconfigured(_) => "project_misconfigured",
            GateError::Configuration(_) => "configuration",
            GateError::StoreUnavailable(_) => "store_unavailable",
            GateError::Timeout(_) => "timeout",
        }
    }
}

impl From<AdmitError> for GateError {
    fn from(err: AdmitError) -> Self {
        match err {
            AdmitError::Configuration(id) => GateError::Configuration(id),
            AdmitError::StoreUnavailable(msg) => GateError::StoreUnavailable(msg),
        }
    }
}

/// Request-boundary admission: credential -> project -> limiter.
///
/// Store failures and timeouts reject the request; the gate never lets a call
/// through without a decision from the limiter.
#[derive(Clone)]
pub struct AdmissionGate {
    directory: Arc<dyn ProjectLookup>,
    limiter: RateLimiter,
    timeout: Duration,
}

impl AdmissionGate {
    pub fn new(directory: Arc<dyn ProjectLookup>, limiter: RateLimiter, timeout: Duration) -> Self {
        Self {
            directory,
            limiter,
            timeout,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn resolve_and_admit(&self, api_key: &str) -> Result<AdmittedProject, GateError> {
        let project = self
            .directory
            .find_by_api_key(api_key)
            .await
            .ok_or(GateError::ProjectNotFound)?;

        let decision = tokio::time::timeout(self.timeout, self.limiter.admit(&project.descriptor()))
            .await
            .map_err(|_| {
                warn!(project_id = %project.id, timeout = ?self.timeout, "admission timed out");
                GateError::Timeout(self.timeout)
            })?
            .map_err(GateError::from)?;

        let remaining = match decision {
            Decision::Allowed { remaining } => remaining,
            Decision::Rejected {
                reason,
                retry_after,
                ..
            } => {
                debug!(project_id = %project.id, "request throttled");
                return Err(GateError::Rejected {
                    reason,
                    retry_after,
                });
            }
        };

        if !project.has_analytics_token() {
            return Err(GateError::ProjectMisconfigured(project.id));
        }

        Ok(AdmittedProject { project, remaining })
    }
}
