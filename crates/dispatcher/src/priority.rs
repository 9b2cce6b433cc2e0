use chrono::{DateTime, Utc};
use saferide_domain::{Request, SENTINEL_PRIORITY};

const TIER_WEIGHT: f64 = 10.0;
const WAIT_WEIGHT: f64 = 0.5;

/// 出行请求优先级
///
/// 紧急请求固定为哨兵值，其余按 `tier * 10 + wait_minutes * 0.5` 计算。
pub fn score(tier: u32, wait_minutes: f64, is_emergency: bool) -> f64 {
    if is_emergency {
        return SENTINEL_PRIORITY;
    }
    f64::from(tier) * TIER_WEIGHT + wait_minutes.max(0.0) * WAIT_WEIGHT
}

/// 按当前时刻重新计算的实时优先级
pub fn live_score(request: &Request, now: DateTime<Utc>) -> f64 {
    score(
        request.requester_tier,
        request.wait_minutes(now),
        request.is_emergency,
    )
}
