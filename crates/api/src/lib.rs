//! # SafeRide API
//!
//! 出行调度的 REST 接口，基于 Axum 构建。所有响应体均包装为 [`response::ApiResponse`]。
//!
//! ## API 端点
//!
//! ### 出行请求
//! - `POST /api/requests` - 创建请求
//! - `POST /api/requests/emergency` - 创建紧急请求
//! - `POST /api/requests/{id}/cancel` - 取消请求
//! - `POST /api/requests/{id}/advance` - 推进请求状态
//! - `GET /api/requests/{id}/position` - 查询排队位置
//!
//! ### 司机
//! - `POST /api/drivers/{driver_id}/sessions` - 开始值班
//! - `POST /api/drivers/{driver_id}/sessions/close` - 结束值班
//! - `POST /api/drivers/{driver_id}/availability` - 切换接单状态
//!
//! ### 分组
//! - `GET /api/groups/{group_id}/queue` - 当前队列
//! - `POST /api/groups/{group_id}/transition` - 年度年级转换
//! - `POST /api/groups/{group_id}/role-transfer` - 管理员移交
//!
//! ## 错误映射
//!
//! | 错误 | 状态码 |
//! |------|--------|
//! | NotFound | 404 |
//! | Validation | 400 |
//! | ConcurrencyConflict | 409 |
//! | Timeout / ExternalService | 503 |
//! | 其他 | 500 |

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::{create_routes, AppState};
use saferide_config::ApiConfig;
use saferide_dispatcher::RequestService;

/// 创建完整的API应用
pub fn create_app(service: Arc<RequestService>, api_config: &ApiConfig) -> Router {
    let router = create_routes(AppState { service }).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
