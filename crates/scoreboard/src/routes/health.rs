use axum::extract::State;
use std::sync::Arc;

use crate::{AppState, ApiError};

/// `GET /health`: plain `ok` once the database answers an integrity check.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<&'static str, ApiError> {
    state
        .db
        .health_check()
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("{:#}", e)))?;
    Ok("ok")
}
