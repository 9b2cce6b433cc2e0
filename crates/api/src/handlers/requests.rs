use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use saferide_domain::{GeoPoint, Pickup};

use crate::{
    error::ApiResult,
    handlers::require_id,
    response::{created, success},
    routes::AppState,
};

/// 普通出行请求
#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub requester_id: String,
    pub pickup: Pickup,
}

#[derive(Debug, Deserialize)]
pub struct CreateEmergencyRequestBody {
    pub requester_id: String,
    pub pickup: Pickup,
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CancelRequestBody {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdvanceRequestBody {
    /// 司机当前位置，用于估算接驾时间
    pub driver_location: Option<GeoPoint>,
}

pub async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> ApiResult<impl IntoResponse> {
    let requester_id = require_id("requester_id", &body.requester_id)?;
    let request = state.service.create_request(requester_id, body.pickup).await?;
    Ok(created(request))
}

pub async fn create_emergency_request(
    State(state): State<AppState>,
    Json(body): Json<CreateEmergencyRequestBody>,
) -> ApiResult<impl IntoResponse> {
    let requester_id = require_id("requester_id", &body.requester_id)?;
    let request = state
        .service
        .create_emergency_request(requester_id, body.pickup, &body.reason)
        .await?;
    Ok(created(request))
}

/// 请求体可以省略
pub async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CancelRequestBody>>,
) -> ApiResult<impl IntoResponse> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let request = state.service.cancel_request(&id, body.reason).await?;
    Ok(success(request))
}

pub async fn advance_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<AdvanceRequestBody>>,
) -> ApiResult<impl IntoResponse> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let request = state
        .service
        .advance_request_status(&id, body.driver_location)
        .await?;
    Ok(success(request))
}

pub async fn get_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let position = state.service.get_queue_position(&id).await?;
    Ok(success(position))
}
