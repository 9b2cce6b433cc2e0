use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use saferide_dispatcher::RequestService;

use crate::handlers::{
    drivers::{close_session, open_session, toggle_availability},
    groups::{list_queue, run_transition, transfer_role},
    health::health_check,
    requests::{advance_request, cancel_request, create_emergency_request, create_request, get_position},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RequestService>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // 出行请求
        .route("/api/requests", post(create_request))
        .route("/api/requests/emergency", post(create_emergency_request))
        .route("/api/requests/{id}/cancel", post(cancel_request))
        .route("/api/requests/{id}/advance", post(advance_request))
        .route("/api/requests/{id}/position", get(get_position))
        // 司机值班
        .route("/api/drivers/{driver_id}/sessions", post(open_session))
        .route("/api/drivers/{driver_id}/sessions/close", post(close_session))
        .route("/api/drivers/{driver_id}/availability", post(toggle_availability))
        // 分组管理
        .route("/api/groups/{group_id}/queue", get(list_queue))
        .route("/api/groups/{group_id}/transition", post(run_transition))
        .route("/api/groups/{group_id}/role-transfer", post(transfer_role))
        .with_state(state)
}
