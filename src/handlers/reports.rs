use crate::{
    entities::batch,
    handlers::{scope_for, AppState},
    services::{
        expiry::ExpiryReport,
        stock_accessor::{LowStockMedicine, StockAccessor},
    },
    ApiResponse, ApiResult,
};
use axum::extract::{Json, Query, State};
use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ExpiryQuery {
    pub medicine_id: Option<i64>,
    pub location_id: Option<i64>,
    /// Reference date; defaults to today (UTC).
    pub as_of: Option<NaiveDate>,
    /// Look-ahead for expiring-soon; defaults to the configured window.
    pub window_days: Option<i64>,
}

pub async fn expired(
    State(state): State<AppState>,
    Query(query): Query<ExpiryQuery>,
) -> ApiResult<Vec<batch::Model>> {
    let batches = state
        .services
        .accessor
        .expired_batches(scope_for(query.medicine_id, query.location_id), query.as_of)
        .await?;

    Ok(Json(ApiResponse::success(batches)))
}

pub async fn expiring_soon(
    State(state): State<AppState>,
    Query(query): Query<ExpiryQuery>,
) -> ApiResult<Vec<batch::Model>> {
    let window = query
        .window_days
        .unwrap_or(state.config.expiring_soon_window_days);
    let batches = state
        .services
        .accessor
        .expiring_soon_batches(scope_for(query.medicine_id, query.location_id), query.as_of, window)
        .await?;

    Ok(Json(ApiResponse::success(batches)))
}

pub async fn below_threshold(State(state): State<AppState>) -> ApiResult<Vec<LowStockMedicine>> {
    let medicines = state.services.accessor.below_alert_threshold().await?;
    Ok(Json(ApiResponse::success(medicines)))
}

/// Runs one expiry sweep on demand and notifies for every expired batch.
pub async fn expiry_sweep(
    State(state): State<AppState>,
    Query(query): Query<ExpiryQuery>,
) -> ApiResult<ExpiryReport> {
    let as_of = query.as_of.unwrap_or_else(StockAccessor::today);
    let window = query
        .window_days
        .unwrap_or(state.config.expiring_soon_window_days);
    let report = state.services.expiry.run(as_of, window).await?;

    Ok(Json(ApiResponse::success(report)))
}
