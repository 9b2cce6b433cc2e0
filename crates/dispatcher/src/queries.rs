//! 各服务共用的存储查询
use saferide_domain::store::{DocumentStore, DocumentStoreExt, Filter, Query, SortDirection, Versioned};
use saferide_domain::{DriverSession, Member, Request, RequestStatus, Role};
use saferide_errors::{DispatchError, DispatchResult};
use tracing::warn;

pub async fn fetch_request(
    store: &dyn DocumentStore,
    request_id: &str,
) -> DispatchResult<Versioned<Request>> {
    store
        .fetch::<Request>(request_id)
        .await?
        .ok_or_else(|| DispatchError::request_not_found(request_id))
}

pub async fn fetch_member(
    store: &dyn DocumentStore,
    member_id: &str,
) -> DispatchResult<Versioned<Member>> {
    store
        .fetch::<Member>(member_id)
        .await?
        .ok_or_else(|| DispatchError::member_not_found(member_id))
}

/// 司机当前未结束的值班会话
pub async fn open_session_for(
    store: &dyn DocumentStore,
    driver_id: &str,
) -> DispatchResult<Option<Versioned<DriverSession>>> {
    let query = Query::new()
        .filter(Filter::eq("driver_id", driver_id))
        .filter(Filter::is_null("ended_at"))
        .order_by("started_at", SortDirection::Desc);
    let mut sessions = store.find::<DriverSession>(&query).await?;
    if sessions.len() > 1 {
        warn!("司机 {} 存在 {} 个未结束的值班会话", driver_id, sessions.len());
    }
    Ok(if sessions.is_empty() {
        None
    } else {
        Some(sessions.remove(0))
    })
}

/// 所有未结束的值班会话，按开始时间排序
pub async fn open_sessions(
    store: &dyn DocumentStore,
    group_id: Option<&str>,
) -> DispatchResult<Vec<Versioned<DriverSession>>> {
    let mut query = Query::new().filter(Filter::is_null("ended_at"));
    if let Some(group_id) = group_id {
        query = query.filter(Filter::eq("group_id", group_id));
    }
    store
        .find::<DriverSession>(&query.order_by("started_at", SortDirection::Asc))
        .await
}

/// 排队中（Open/Bound/EnRoute）的请求
pub async fn queued_requests(
    store: &dyn DocumentStore,
    group_id: &str,
) -> DispatchResult<Vec<Versioned<Request>>> {
    let query = Query::new()
        .filter(Filter::eq("group_id", group_id))
        .filter(Filter::is_in(
            "status",
            vec![RequestStatus::Open, RequestStatus::Bound, RequestStatus::EnRoute],
        ));
    store.find::<Request>(&query).await
}

pub async fn active_requests_of_driver(
    store: &dyn DocumentStore,
    driver_id: &str,
) -> DispatchResult<Vec<Request>> {
    let query = Query::new()
        .filter(Filter::eq("driver_id", driver_id))
        .filter(Filter::is_in(
            "status",
            vec![RequestStatus::Bound, RequestStatus::EnRoute],
        ));
    Ok(store
        .find::<Request>(&query)
        .await?
        .into_iter()
        .map(|r| r.value)
        .collect())
}

pub async fn requester_has_active_request(
    store: &dyn DocumentStore,
    requester_id: &str,
) -> DispatchResult<bool> {
    let query = Query::new()
        .filter(Filter::eq("requester_id", requester_id))
        .filter(Filter::is_in(
            "status",
            vec![RequestStatus::Open, RequestStatus::Bound, RequestStatus::EnRoute],
        ))
        .limit(1);
    Ok(!store.find::<Request>(&query).await?.is_empty())
}

pub async fn group_members(
    store: &dyn DocumentStore,
    group_id: &str,
) -> DispatchResult<Vec<Versioned<Member>>> {
    store
        .find::<Member>(&Query::new().filter(Filter::eq("group_id", group_id)))
        .await
}

/// 分组管理员id列表；多名管理员可以容忍，但属于异常情况
pub async fn group_admin_ids(store: &dyn DocumentStore, group_id: &str) -> DispatchResult<Vec<String>> {
    let query = Query::new()
        .filter(Filter::eq("group_id", group_id))
        .filter(Filter::eq("role", Role::Admin));
    let admins: Vec<String> = store
        .find::<Member>(&query)
        .await?
        .into_iter()
        .map(|m| m.value.id)
        .collect();

    match admins.len() {
        0 => warn!("分组 {} 没有管理员，告警将无人接收", group_id),
        1 => {}
        n => warn!("分组 {} 存在 {} 名管理员", group_id, n),
    }
    Ok(admins)
}
