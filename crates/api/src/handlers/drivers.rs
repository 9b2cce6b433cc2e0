use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::{
    error::ApiResult,
    handlers::require_id,
    response::{created, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct OpenSessionBody {
    pub group_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityBody {
    pub available: bool,
}

pub async fn open_session(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
    Json(body): Json<OpenSessionBody>,
) -> ApiResult<impl IntoResponse> {
    let group_id = require_id("group_id", &body.group_id)?;
    let session = state.service.open_driver_session(&driver_id, group_id).await?;
    Ok(created(session))
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state.service.close_driver_session(&driver_id).await?;
    Ok(success(session))
}

pub async fn toggle_availability(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
    Json(body): Json<AvailabilityBody>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .service
        .toggle_driver_availability(&driver_id, body.available)
        .await?;
    Ok(success(outcome))
}
