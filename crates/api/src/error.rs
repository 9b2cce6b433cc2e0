use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use saferide_errors::DispatchError;
use tracing::{error, warn};

use crate::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度错误: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(err) => match err {
                DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
                DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
                DispatchError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
                DispatchError::Timeout(_) | DispatchError::ExternalService(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// 校验与未找到类错误原样返回，其余只给出通用提示
    fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => format!("请求参数错误: {msg}"),
            ApiError::Dispatch(err @ (DispatchError::NotFound { .. } | DispatchError::Validation(_))) => {
                err.to_string()
            }
            ApiError::Dispatch(err) => err.user_message().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        } else {
            warn!("请求被拒绝 ({}): {}", status.as_u16(), self);
        }
        (status, ApiResponse::failure(self.public_message())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
