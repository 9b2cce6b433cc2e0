use crate::*;

#[test]
fn test_dispatch_error_display() {
    let err = DispatchError::member_not_found("m-1");
    assert_eq!(err.to_string(), "成员未找到: m-1");

    let err = DispatchError::request_not_found("r-9");
    assert_eq!(err.to_string(), "出行请求未找到: r-9");

    let err = DispatchError::validation("不能把管理员角色转移给自己");
    assert_eq!(err.to_string(), "数据验证失败: 不能把管理员角色转移给自己");

    let err = DispatchError::conflict("driver d-1 version 3");
    assert_eq!(err.to_string(), "并发冲突: driver d-1 version 3");

    let err = DispatchError::Timeout("routing".to_string());
    assert_eq!(err.to_string(), "操作超时: routing");
}

#[test]
fn test_error_classification() {
    assert!(DispatchError::conflict("x").is_conflict());
    assert!(DispatchError::conflict("x").is_retryable());
    assert!(DispatchError::database_error("locked").is_retryable());
    assert!(!DispatchError::validation("bad").is_retryable());
    assert!(!DispatchError::member_not_found("m").is_retryable());
    assert!(DispatchError::member_not_found("m").is_not_found());
}

#[test]
fn test_user_message_does_not_leak_details() {
    let err = DispatchError::Database("UNIQUE constraint failed: documents.id".to_string());
    assert_eq!(err.user_message(), "系统繁忙，请稍后重试");
    assert!(!err.user_message().contains("documents"));

    let err = DispatchError::session_not_found("driver-7");
    assert_eq!(err.user_message(), "请求的资源不存在");
}

#[test]
fn test_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: DispatchError = json_err.into();
    assert!(matches!(err, DispatchError::Serialization(_)));

    let err: DispatchError = anyhow::anyhow!("boom").into();
    assert_eq!(err, DispatchError::Internal("boom".to_string()));
}
