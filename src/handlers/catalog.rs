use crate::{
    entities::{location, medicine, provider},
    errors::ServiceError,
    handlers::AppState,
    services::catalog::{
        LocationRemoval, LocationUpdate, MedicineChange, MedicineUpdate, NewLocation, NewMedicine,
        NewProvider,
    },
    ApiResponse, ApiResult,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{json, Value};

pub async fn list_medicines(State(state): State<AppState>) -> ApiResult<Vec<medicine::Model>> {
    let medicines = state.services.catalog.list_medicines().await?;
    Ok(Json(ApiResponse::success(medicines)))
}

pub async fn create_medicine(
    State(state): State<AppState>,
    Json(input): Json<NewMedicine>,
) -> Result<impl IntoResponse, ServiceError> {
    let medicine = state.services.catalog.create_medicine(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(medicine))))
}

pub async fn get_medicine(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<medicine::Model> {
    let medicine = state.services.catalog.get_medicine(id).await?;
    Ok(Json(ApiResponse::success(medicine)))
}

pub async fn update_medicine(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(changes): Json<MedicineUpdate>,
) -> ApiResult<MedicineChange> {
    let change = state.services.catalog.update_medicine(id, changes).await?;
    Ok(Json(ApiResponse::success(change)))
}

pub async fn delete_medicine(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    let removed = state.services.catalog.delete_medicine(id).await?;
    Ok(Json(ApiResponse::success(
        json!({ "medicine_id": id, "batches_removed": removed }),
    )))
}

pub async fn list_locations(State(state): State<AppState>) -> ApiResult<Vec<location::Model>> {
    let locations = state.services.catalog.list_locations().await?;
    Ok(Json(ApiResponse::success(locations)))
}

pub async fn create_location(
    State(state): State<AppState>,
    Json(input): Json<NewLocation>,
) -> Result<impl IntoResponse, ServiceError> {
    let location = state.services.catalog.create_location(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(location))))
}

pub async fn get_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<location::Model> {
    let location = state.services.catalog.get_location(id).await?;
    Ok(Json(ApiResponse::success(location)))
}

pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(changes): Json<LocationUpdate>,
) -> ApiResult<location::Model> {
    let location = state.services.catalog.update_location(id, changes).await?;
    Ok(Json(ApiResponse::success(location)))
}

pub async fn delete_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<LocationRemoval> {
    let removal = state.services.catalog.delete_location(id).await?;
    Ok(Json(ApiResponse::success(removal)))
}

pub async fn list_providers(State(state): State<AppState>) -> ApiResult<Vec<provider::Model>> {
    let providers = state.services.catalog.list_providers().await?;
    Ok(Json(ApiResponse::success(providers)))
}

pub async fn create_provider(
    State(state): State<AppState>,
    Json(input): Json<NewProvider>,
) -> Result<impl IntoResponse, ServiceError> {
    let provider = state.services.catalog.create_provider(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(provider))))
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<provider::Model> {
    let provider = state.services.catalog.get_provider(id).await?;
    Ok(Json(ApiResponse::success(provider)))
}

pub async fn delete_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServiceError> {
    state.services.catalog.delete_provider(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
