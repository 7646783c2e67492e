use std::time::Instant;

use mixgate_common::ProjectId;
use tracing::info;

use crate::upstream::EventKind;

/// Per-request facts gathered along the ingestion path, logged once at the end.
pub struct RequestContext {
    pub request_start: Instant,

    /// Set once the body has been validated.
    pub kind: Option<EventKind>,

    /// Set once the gate admitted the call.
    pub project_id: Option<ProjectId>,

    pub status: u16,

    /// Short label of why the call was refused, if it was.
    pub refusal: Option<&'static str>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_start: Instant::now(),
            kind: None,
            project_id: None,
            status: 0,
            refusal: None,
        }
    }

    pub fn log_completion(&self) {
        let duration = self.request_start.elapsed();
        info!(
            kind = self.kind.map(EventKind::as_str).unwrap_or("unknown"),
            project_id = ?self.project_id,
            status = self.status,
            duration_ms = duration.as_millis() as u64,
            refused = self.refusal.is_some(),
            refusal = self.refusal.unwrap_or(""),
            "request completed"
        );
    }
}
