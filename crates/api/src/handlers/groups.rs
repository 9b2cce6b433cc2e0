use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::{error::ApiResult, handlers::require_id, response::success, routes::AppState};

#[derive(Debug, Deserialize)]
pub struct RoleTransferBody {
    pub from_member_id: String,
    pub to_member_id: String,
}

pub async fn list_queue(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let queue = state.service.list_open_requests(&group_id).await?;
    Ok(success(queue))
}

pub async fn run_transition(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    info!("收到分组 {} 的年级转换请求", group_id);
    let log = state.service.execute_annual_transition(&group_id).await?;
    Ok(success(log))
}

pub async fn transfer_role(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(body): Json<RoleTransferBody>,
) -> ApiResult<impl IntoResponse> {
    let from = require_id("from_member_id", &body.from_member_id)?;
    let to = require_id("to_member_id", &body.to_member_id)?;
    let log = state.service.transfer_admin_role(from, to, &group_id).await?;
    Ok(success(log))
}
