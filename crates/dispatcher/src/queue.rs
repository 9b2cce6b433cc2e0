use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use saferide_domain::Request;
use saferide_errors::{DispatchError, DispatchResult};
use serde::Serialize;

use crate::priority::live_score;

/// 排队中的请求及其实时名次
#[derive(Debug, Clone, Serialize)]
pub struct QueuedRequest {
    pub request: Request,
    pub score: f64,
    pub rank: usize,
}

/// 分数降序，同分时请求时间早者优先，最后按id保证顺序确定
fn queue_order(a: (&Request, f64), b: (&Request, f64)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.requested_at.cmp(&b.0.requested_at))
        .then_with(|| a.0.id.cmp(&b.0.id))
}

/// 按队列顺序排列开放集合，忽略已结束的请求
pub fn ordered(open_set: &[Request], now: DateTime<Utc>) -> Vec<QueuedRequest> {
    let mut scored: Vec<(&Request, f64)> = open_set
        .iter()
        .filter(|r| r.status.is_queued())
        .map(|r| (r, live_score(r, now)))
        .collect();
    scored.sort_by(|a, b| queue_order(*a, *b));

    scored
        .into_iter()
        .enumerate()
        .map(|(index, (request, score))| QueuedRequest {
            request: request.clone(),
            score,
            rank: index + 1,
        })
        .collect()
}

/// 单个请求的名次（从1开始）
pub fn rank(request_id: &str, open_set: &[Request], now: DateTime<Utc>) -> DispatchResult<usize> {
    let target = open_set
        .iter()
        .find(|r| r.id == request_id && r.status.is_queued())
        .ok_or_else(|| DispatchError::request_not_found(request_id))?;
    let target = (target, live_score(target, now));

    let ahead = open_set
        .iter()
        .filter(|r| r.status.is_queued() && r.id != request_id)
        .filter(|r| queue_order((*r, live_score(r, now)), target) == Ordering::Less)
        .count();
    Ok(ahead + 1)
}

/// 批量计算所有名次，避免逐个调用 `rank` 的平方复杂度
pub fn all_ranks(open_set: &[Request], now: DateTime<Utc>) -> HashMap<String, usize> {
    ordered(open_set, now)
        .into_iter()
        .map(|entry| (entry.request.id, entry.rank))
        .collect()
}
