use axum::{extract::State, Json};
use std::sync::Arc;

use crate::{AppState, ApiError, Station};

pub async fn get_stations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Station>>, ApiError> {
    let stations = state.db.list_stations().await?;
    Ok(Json(stations))
}
