use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::models::{
    requests::FieldError,
    schema::{Column, Page},
};

use super::{error::ApiError, pagination::PageParams, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found()
}

pub async fn list(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Page<Column>>, ApiError> {
    let Path(table_pk) = path.map_err(|_| ApiError::not_found())?;
    let Query(params) = params.map_err(|e| invalid_request(e.body_text()))?;
    let (limit, offset) = state.pagination.resolve(&params);
    let page = state.service.list(table_pk, limit, offset).await?;
    Ok(Json(page))
}

pub async fn create(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Column>), ApiError> {
    let Path(table_pk) = path.map_err(|_| ApiError::not_found())?;
    let Json(payload) = payload.map_err(|e| invalid_request(e.body_text()))?;
    let column = state.service.create(table_pk, &payload).await?;
    Ok((StatusCode::CREATED, Json(column)))
}

pub async fn retrieve(
    State(state): State<AppState>,
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<Json<Column>, ApiError> {
    let Path((table_pk, pk)) = path.map_err(|_| ApiError::not_found())?;
    let column = state.service.retrieve(table_pk, pk).await?;
    Ok(Json(column))
}

pub async fn partial_update(
    State(state): State<AppState>,
    path: Result<Path<(i64, i64)>, PathRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Column>, ApiError> {
    let Path((table_pk, pk)) = path.map_err(|_| ApiError::not_found())?;
    let Json(payload) = payload.map_err(|e| invalid_request(e.body_text()))?;
    let column = state.service.update(table_pk, pk, &payload).await?;
    Ok(Json(column))
}

pub async fn destroy(
    State(state): State<AppState>,
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path((table_pk, pk)) = path.map_err(|_| ApiError::not_found())?;
    state.service.delete(table_pk, pk).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn invalid_request(message: String) -> ApiError {
    ApiError::validation(vec![FieldError::non_field(message)])
}
