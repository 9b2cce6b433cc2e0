use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use saferide_domain::ports::Clock;
use saferide_domain::store::{DocumentStore, Versioned, WriteBatch};
use saferide_domain::{DriverSession, Request, RequestStatus};
use saferide_errors::DispatchResult;

use crate::priority::live_score;
use crate::queries;
use crate::queue;
use crate::wait_time;

/// 一次成功的绑定
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub request_id: String,
    pub driver_id: String,
    pub session_id: String,
    /// 司机完成手头订单前乘客需等待的分钟数
    pub estimated_wait_minutes: u32,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindOutcome {
    Bound(Binding),
    /// 没有可接单的司机，请求保持 Open
    NoDriver,
    /// 请求已不处于 Open（被取消或已被其他触发绑定）
    NotOpen,
    /// 重试次数用尽仍然冲突，留给下一次触发
    Contended,
}

/// 读取阶段的结果，提交时逐一校验其中记录的版本
#[derive(Debug, Clone)]
pub struct BindPlan {
    request: Versioned<Request>,
    chosen: Versioned<DriverSession>,
    estimate: u32,
    /// 分组内其余未结束会话的版本，任一司机切换状态或负载变化都会使计划失效
    others: Vec<(String, u64)>,
}

impl BindPlan {
    pub fn request_id(&self) -> &str {
        &self.request.value.id
    }
    pub fn driver_id(&self) -> &str {
        &self.chosen.value.driver_id
    }
}

#[derive(Debug, Clone)]
pub enum BindAttempt {
    Ready(BindPlan),
    NoDriver,
    NotOpen,
}

/// 选择等待时间最短的可接单司机，同值时先出现者胜出
pub fn select_driver<'a>(
    available: &'a [DriverSession],
    all_active_requests: &[Request],
) -> Option<(&'a DriverSession, u32)> {
    let estimates = wait_time::estimate_all(available, all_active_requests);
    let mut best: Option<(&DriverSession, u32)> = None;
    for session in available.iter().filter(|s| s.can_accept_requests()) {
        let estimate = estimates.get(&session.driver_id).copied().unwrap_or(0);
        match best {
            Some((_, current)) if current <= estimate => {}
            _ => best = Some((session, estimate)),
        }
    }
    best
}

/// 请求与司机的匹配器
///
/// 读取阶段选出司机，提交阶段以版本号为前置条件原子写入请求与司机会话。
/// 并发绑定同一司机时只有一个提交成功，其余得到冲突并重试。
pub struct DispatchMatcher {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    max_bind_attempts: u32,
}

impl DispatchMatcher {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, max_bind_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_bind_attempts: max_bind_attempts.max(1),
        }
    }

    pub async fn prepare_bind(&self, request_id: &str) -> DispatchResult<BindAttempt> {
        let request = queries::fetch_request(self.store.as_ref(), request_id).await?;
        if request.value.status != RequestStatus::Open {
            return Ok(BindAttempt::NotOpen);
        }

        let sessions =
            queries::open_sessions(self.store.as_ref(), Some(&request.value.group_id)).await?;
        let available: Vec<DriverSession> = sessions
            .iter()
            .map(|s| s.value.clone())
            .filter(DriverSession::can_accept_requests)
            .collect();
        if available.is_empty() {
            debug!("分组 {} 没有可接单的司机", request.value.group_id);
            return Ok(BindAttempt::NoDriver);
        }

        let active: Vec<Request> = queries::queued_requests(self.store.as_ref(), &request.value.group_id)
            .await?
            .into_iter()
            .map(|r| r.value)
            .filter(|r| r.status.is_active())
            .collect();

        let Some((selected, estimate)) = select_driver(&available, &active) else {
            return Ok(BindAttempt::NoDriver);
        };
        let selected_id = selected.session_id.clone();

        let all_sessions: Vec<DriverSession> = sessions.iter().map(|s| s.value.clone()).collect();
        let estimates = wait_time::estimate_all(&all_sessions, &active);
        let mut chosen = None;
        let mut others = Vec::with_capacity(sessions.len().saturating_sub(1));
        for session in sessions {
            if session.value.session_id == selected_id {
                chosen = Some(session);
            } else {
                let load = estimates.get(&session.value.driver_id).copied().unwrap_or(0);
                others.push((load, session.value.session_id.clone(), session.version));
            }
        }
        let Some(chosen) = chosen else {
            return Ok(BindAttempt::NoDriver);
        };

        // 单批上限内优先校验负载最低的会话，含暂不接单的会话
        let budget = self.store.max_batch_ops().saturating_sub(2);
        if others.len() > budget {
            others.sort_by_key(|(load, _, _)| *load);
            debug!(
                "分组 {} 有 {} 个其他会话，提交时只校验负载最低的 {} 个",
                request.value.group_id,
                others.len(),
                budget
            );
            others.truncate(budget);
        }
        let others = others
            .into_iter()
            .map(|(_, session_id, version)| (session_id, version))
            .collect();

        debug!(
            "请求 {} 选定司机 {} (预计等待 {} 分钟)",
            request_id, chosen.value.driver_id, estimate
        );
        Ok(BindAttempt::Ready(BindPlan {
            request,
            chosen,
            estimate,
            others,
        }))
    }

    /// 提交绑定；读取后任何相关文档被修改都会返回 `ConcurrencyConflict`
    pub async fn commit_bind(&self, plan: BindPlan) -> DispatchResult<Binding> {
        let now = self.clock.now();
        let BindPlan {
            request,
            chosen,
            estimate,
            others,
        } = plan;

        let mut bound_request = request.value;
        bound_request.priority = live_score(&bound_request, now).max(bound_request.priority);
        bound_request.bind(&chosen.value.driver_id, now)?;

        let mut session = chosen.value;
        session.last_bound_at = Some(now);

        let mut batch = WriteBatch::new();
        batch.update(&bound_request, request.version)?;
        batch.update(&session, chosen.version)?;
        for (session_id, version) in &others {
            batch.check::<DriverSession>(session_id, *version);
        }
        self.store.commit(batch).await?;

        counter!("dispatch_bindings_total").increment(1);
        info!(
            "请求 {} 已绑定司机 {} (预计等待 {} 分钟)",
            bound_request.id, session.driver_id, estimate
        );
        Ok(Binding {
            request_id: bound_request.id,
            driver_id: session.driver_id,
            session_id: session.session_id,
            estimated_wait_minutes: estimate,
            attempts: 1,
        })
    }

    /// 单次尝试，冲突直接返回错误
    pub async fn try_bind_once(&self, request_id: &str) -> DispatchResult<BindOutcome> {
        match self.prepare_bind(request_id).await? {
            BindAttempt::Ready(plan) => Ok(BindOutcome::Bound(self.commit_bind(plan).await?)),
            BindAttempt::NoDriver => Ok(BindOutcome::NoDriver),
            BindAttempt::NotOpen => Ok(BindOutcome::NotOpen),
        }
    }

    /// 带有限次重试的绑定
    pub async fn try_bind(&self, request_id: &str) -> DispatchResult<BindOutcome> {
        for attempt in 1..=self.max_bind_attempts {
            match self.try_bind_once(request_id).await {
                Ok(BindOutcome::Bound(mut binding)) => {
                    binding.attempts = attempt;
                    return Ok(BindOutcome::Bound(binding));
                }
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_conflict() => {
                    counter!("dispatch_conflicts_total").increment(1);
                    warn!(
                        "绑定请求 {} 时发生并发冲突 (第 {}/{} 次): {}",
                        request_id, attempt, self.max_bind_attempts, e
                    );
                    if attempt < self.max_bind_attempts {
                        let jitter_ms = rand::rng().random_range(0..=5 * u64::from(attempt));
                        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(BindOutcome::Contended)
    }

    /// 按队列名次依次为分组内的 Open 请求匹配司机，直到无司机可用或队列为空
    #[instrument(skip(self))]
    pub async fn run_queue(&self, group_id: &str) -> DispatchResult<usize> {
        let now = self.clock.now();
        let open_set: Vec<Request> = queries::queued_requests(self.store.as_ref(), group_id)
            .await?
            .into_iter()
            .map(|r| r.value)
            .collect();

        let mut bound = 0;
        for entry in queue::ordered(&open_set, now)
            .into_iter()
            .filter(|e| e.request.status == RequestStatus::Open)
        {
            match self.try_bind(&entry.request.id).await? {
                BindOutcome::Bound(_) => bound += 1,
                BindOutcome::NotOpen => continue,
                BindOutcome::NoDriver => break,
                BindOutcome::Contended => {
                    warn!("请求 {} 多次绑定冲突，等待下一次触发", entry.request.id);
                    break;
                }
            }
        }

        if bound > 0 {
            info!("分组 {} 本轮匹配完成 {} 个绑定", group_id, bound);
        } else {
            debug!("分组 {} 本轮没有新的绑定", group_id);
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saferide_testing_utils::{DriverSessionBuilder, RequestBuilder};

    #[test]
    fn test_selects_idle_driver() {
        let sessions = vec![
            DriverSessionBuilder::new("busy").build(),
            DriverSessionBuilder::new("idle").build(),
        ];
        let active = vec![
            RequestBuilder::new().bound_to("busy").build(),
            RequestBuilder::new().en_route_with("busy").build(),
        ];
        let (selected, estimate) = select_driver(&sessions, &active).unwrap();
        assert_eq!(selected.driver_id, "idle");
        assert_eq!(estimate, 0);
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let sessions = vec![
            DriverSessionBuilder::new("first").build(),
            DriverSessionBuilder::new("second").build(),
        ];
        let (selected, _) = select_driver(&sessions, &[]).unwrap();
        assert_eq!(selected.driver_id, "first");
    }

    #[test]
    fn test_never_selects_unavailable_driver() {
        let now = chrono::Utc::now();
        let sessions = vec![
            DriverSessionBuilder::new("away").unavailable_since(now).build(),
            DriverSessionBuilder::new("closed").closed_at(now).build(),
        ];
        assert!(select_driver(&sessions, &[]).is_none());

        let mut sessions = sessions;
        sessions.push(DriverSessionBuilder::new("loaded").build());
        let active = vec![RequestBuilder::new().bound_to("loaded").build()];
        let (selected, estimate) = select_driver(&sessions, &active).unwrap();
        assert_eq!(selected.driver_id, "loaded");
        assert_eq!(estimate, 15);
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        assert!(select_driver(&[], &[]).is_none());
    }
}
