use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{timestamps::parse_date, ApiError, AppState, DashboardStat, ForecastErrorRow};

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub window_days: Option<u32>,
    pub station: Option<String>,
    pub source: Option<String>,
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<DashboardStat>>, ApiError> {
    let stats = state
        .db
        .get_stats(
            query.window_days,
            query.station.as_deref(),
            query.source.as_deref(),
        )
        .await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    pub date: String,
    pub station: Option<String>,
}

pub async fn get_errors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ErrorsQuery>,
) -> Result<Json<Vec<ForecastErrorRow>>, ApiError> {
    let date = parse_date(&query.date).ok_or_else(|| {
        ApiError::BadRequest(format!("date must be YYYY-MM-DD, got {:?}", query.date))
    })?;
    let rows = state.db.get_errors(date, query.station.as_deref()).await?;
    Ok(Json(rows))
}
