use thiserror::Error;

#[cfg(test)]
mod tests;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("{entity}未找到: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("并发冲突: {0}")]
    ConcurrencyConflict(String),
    #[error("外部服务调用失败: {0}")]
    ExternalService(String),
    #[error("数据库操作错误: {0}")]
    Database(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    pub fn not_found<S: Into<String>>(entity: &'static str, id: S) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
    pub fn member_not_found<S: Into<String>>(id: S) -> Self {
        Self::not_found("成员", id)
    }
    pub fn request_not_found<S: Into<String>>(id: S) -> Self {
        Self::not_found("出行请求", id)
    }
    pub fn session_not_found<S: Into<String>>(driver_id: S) -> Self {
        Self::not_found("司机值班会话", driver_id)
    }
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::ConcurrencyConflict(_))
    }
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::NotFound { .. })
    }
    /// 乐观锁冲突与瞬时故障可以重试，校验类错误重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::ConcurrencyConflict(_)
                | DispatchError::Database(_)
                | DispatchError::Timeout(_)
        )
    }
    /// 面向调用方的提示，不暴露内部细节
    pub fn user_message(&self) -> &str {
        match self {
            DispatchError::NotFound { .. } => "请求的资源不存在",
            DispatchError::Validation(_) => "输入数据验证失败",
            DispatchError::ConcurrencyConflict(_) => "数据已被其他操作修改，请稍后重试",
            DispatchError::Timeout(_) => "操作超时，请稍后重试",
            DispatchError::ExternalService(_) => "外部服务暂不可用",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        DispatchError::Internal(err.to_string())
    }
}
