pub mod drivers;
pub mod groups;
pub mod health;
pub mod requests;

use crate::error::{ApiError, ApiResult};

/// 标识字段不能为空白
pub(crate) fn require_id<'a>(field: &str, value: &'a str) -> ApiResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} 不能为空")));
    }
    Ok(trimmed)
}
