use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::routes::error::ApiError;
use crate::state::SharedState;

/// GET /api/stats
///
/// Request totals from the metrics plus a snapshot of counter usage.
pub async fn get_stats(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let uptime_secs = state.start_time.elapsed().as_secs();
    let m = &state.metrics;
    let total_requests = m.requests_total.get();

    let requests_per_second = if uptime_secs > 0 {
        total_requests as f64 / uptime_secs as f64
    } else {
        0.0
    };

    let threshold = state
        .config
        .read()
        .expect("config lock poisoned")
        .rate_limit
        .calls_per_hour;
    let counters = state.counters.list().await?;
    let at_limit = counters.iter().filter(|c| c.count >= threshold).count();
    let calls_this_window: u64 = counters.iter().map(|c| c.count).sum();

    Ok(Json(json!({
        "total_requests": total_requests,
        "admitted_requests": m.requests_admitted.get(),
        "rate_limited_requests": m.requests_rate_limited.get(),
        "events_forwarded": m.events_forwarded.get(),
        "forward_failures": m.forward_failures.get(),
        "reset_runs": m.reset_runs.get(),
        "projects": state.registry.len(),
        "counters": counters.len(),
        "projects_at_limit": at_limit,
        "calls_this_window": calls_this_window,
        "uptime_secs": uptime_secs,
        "requests_per_second": requests_per_second
    })))
}
