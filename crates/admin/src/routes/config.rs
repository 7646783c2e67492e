use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use crate::routes::error::ApiError;
use crate::state::SharedState;

/// GET /api/config
///
/// The configuration the gateway was started with. Threshold, storage and
/// forwarder settings are fixed at startup, so there is no write endpoint.
pub async fn get_config(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let config = state.config.read().expect("config lock poisoned");
    serde_json::to_value(&*config).map(Json).map_err(|e| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("serialization failed: {}", e),
        )
    })
}
