use std::collections::HashMap;

use saferide_domain::{DriverSession, Request, AVERAGE_JOB_MINUTES};

/// 司机空闲前的预计等待分钟数
///
/// 只统计该司机处于 Bound/EnRoute 的请求，每单按平均耗时计。
pub fn estimate(driver_id: &str, active_requests: &[Request]) -> u32 {
    let active = active_requests
        .iter()
        .filter(|r| r.status.is_active() && r.driver_id.as_deref() == Some(driver_id))
        .count() as u32;
    active * AVERAGE_JOB_MINUTES
}

/// 一次遍历计算多名司机的等待时间
pub fn estimate_all(
    sessions: &[DriverSession],
    all_active_requests: &[Request],
) -> HashMap<String, u32> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for request in all_active_requests.iter().filter(|r| r.status.is_active()) {
        if let Some(driver_id) = request.driver_id.as_deref() {
            *counts.entry(driver_id).or_default() += 1;
        }
    }
    sessions
        .iter()
        .map(|s| {
            let jobs = counts.get(s.driver_id.as_str()).copied().unwrap_or(0);
            (s.driver_id.clone(), jobs * AVERAGE_JOB_MINUTES)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use saferide_testing_utils::{DriverSessionBuilder, RequestBuilder};

    #[test]
    fn test_idle_driver_has_no_wait() {
        assert_eq!(estimate("d1", &[]), 0);
    }

    #[test]
    fn test_wait_scales_with_active_jobs() {
        let active = vec![
            RequestBuilder::new().bound_to("d1").build(),
            RequestBuilder::new().en_route_with("d1").build(),
        ];
        assert_eq!(estimate("d1", &active), 30);
    }

    #[test]
    fn test_only_own_active_jobs_count() {
        let requests = vec![
            RequestBuilder::new().bound_to("d1").build(),
            RequestBuilder::new().bound_to("d2").build(),
            RequestBuilder::new().completed_by("d1").build(),
            RequestBuilder::new().build(),
        ];
        assert_eq!(estimate("d1", &requests), 15);

        let sessions = vec![
            DriverSessionBuilder::new("d1").build(),
            DriverSessionBuilder::new("d3").build(),
        ];
        let all = estimate_all(&sessions, &requests);
        assert_eq!(all["d1"], 15);
        assert_eq!(all["d3"], 0);
        assert!(!all.contains_key("d2"));
    }
}
