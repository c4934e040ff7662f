use crate::{
    entities::{batch, location},
    errors::ServiceError,
    handlers::{scope_for, AppState},
    services::{
        reorder::{ReorderDecision, ReorderSignal},
        stock_accessor::{StockScope, StockSnapshot},
        stock_mutator::{BatchChange, StockReduction},
    },
    ApiResponse, ApiResult,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ReceiveStockRequest {
    pub medicine_id: i64,
    pub location_id: i64,
    pub quantity: i64,
    pub expiration_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ReduceStockRequest {
    pub medicine_id: i64,
    pub location_id: i64,
    pub quantity: i64,
    /// Restricts the removal to the batch with this date.
    pub expiration_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustBatchRequest {
    pub quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchListQuery {
    pub medicine_id: Option<i64>,
    pub location_id: Option<i64>,
    #[serde(default)]
    pub include_empty: bool,
}

#[derive(Debug, Serialize)]
pub struct LocationStockResponse {
    pub location: location::Model,
    pub total_quantity: i64,
    pub batches: Vec<batch::Model>,
}

#[derive(Debug, Serialize)]
pub struct ReorderCheckResponse {
    pub decision: ReorderDecision,
    /// Present when this check sent a new signal.
    pub dispatched: Option<ReorderSignal>,
}

pub async fn receive_stock(
    State(state): State<AppState>,
    Json(req): Json<ReceiveStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let batch = state
        .services
        .mutator
        .receive_batch(
            req.medicine_id,
            req.location_id,
            req.quantity,
            req.expiration_date,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(batch))))
}

pub async fn reduce_stock(
    State(state): State<AppState>,
    Json(req): Json<ReduceStockRequest>,
) -> ApiResult<StockReduction> {
    let reduction = state
        .services
        .mutator
        .reduce_stock(
            req.medicine_id,
            req.location_id,
            req.quantity,
            req.expiration_date,
        )
        .await?;

    Ok(Json(ApiResponse::success(reduction)))
}

pub async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<BatchListQuery>,
) -> ApiResult<Vec<batch::Model>> {
    let batches = state
        .services
        .accessor
        .batches(
            scope_for(query.medicine_id, query.location_id),
            query.include_empty,
        )
        .await?;

    Ok(Json(ApiResponse::success(batches)))
}

pub async fn adjust_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AdjustBatchRequest>,
) -> ApiResult<BatchChange> {
    let change = state
        .services
        .mutator
        .adjust_batch_quantity(id, req.quantity)
        .await?;

    Ok(Json(ApiResponse::success(change)))
}

pub async fn delete_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<BatchChange> {
    let change = state.services.mutator.delete_batch(id).await?;
    Ok(Json(ApiResponse::success(change)))
}

pub async fn medicine_stock(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StockSnapshot> {
    let snapshot = state.services.accessor.snapshot(id).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

pub async fn location_stock(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<LocationStockResponse> {
    let location = state.services.catalog.get_location(id).await?;
    let accessor = &state.services.accessor;
    let total_quantity = accessor.total_quantity(StockScope::Location(id)).await?;
    let batches = accessor.batches(StockScope::Location(id), false).await?;

    Ok(Json(ApiResponse::success(LocationStockResponse {
        location,
        total_quantity,
        batches,
    })))
}

pub async fn reorder_check(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ReorderCheckResponse> {
    let (decision, dispatched) = state.services.reorder.evaluate_now(id).await?;
    Ok(Json(ApiResponse::success(ReorderCheckResponse {
        decision,
        dispatched,
    })))
}
