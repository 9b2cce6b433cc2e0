use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use saferide_config::AppConfig;
use saferide_domain::ports::{Clock, NotificationService};
use saferide_domain::store::{DocumentStore, WriteBatch};
use saferide_domain::{
    DriverSession, GeoPoint, Pickup, Request, RequestStatus, RoleTransferLog, TransitionLog,
};
use saferide_errors::{DispatchError, DispatchResult};

use crate::activity_monitor::{ActivityMonitor, ActivityThresholds, ToggleOutcome};
use crate::alerts::AlertPublisher;
use crate::emergency::EmergencyOverride;
use crate::eta::EtaResolver;
use crate::matcher::DispatchMatcher;
use crate::priority;
use crate::queries;
use crate::queue::{self, QueuedRequest};
use crate::role_transfer::RoleTransferCoordinator;
use crate::transition::MembershipTransitionBatcher;
use crate::wait_time;

/// 请求在队列中的位置
#[derive(Debug, Clone, Serialize)]
pub struct QueuePosition {
    pub request_id: String,
    pub status: RequestStatus,
    pub rank: usize,
    pub queue_length: usize,
    pub score: f64,
    /// 已绑定时为司机手头订单的预计等待分钟数
    pub driver_wait_minutes: Option<u32>,
}

/// 出行请求的业务入口
///
/// 写入只负责落库，匹配由变更事件经触发总线异步驱动。
pub struct RequestService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    matcher: Arc<DispatchMatcher>,
    monitor: Arc<ActivityMonitor>,
    emergency: EmergencyOverride,
    transition: MembershipTransitionBatcher,
    role_transfer: RoleTransferCoordinator,
    eta: EtaResolver,
    max_attempts: u32,
}

impl RequestService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationService>,
        eta: EtaResolver,
        config: &AppConfig,
    ) -> Self {
        let max_attempts = config.dispatcher.max_bind_attempts.max(1);
        let alerts = Arc::new(AlertPublisher::new(store.clone(), notifier));
        let matcher = Arc::new(DispatchMatcher::new(store.clone(), clock.clone(), max_attempts));
        let monitor = Arc::new(ActivityMonitor::new(
            store.clone(),
            clock.clone(),
            alerts.clone(),
            ActivityThresholds::from(&config.monitor),
            max_attempts,
        ));

        Self {
            emergency: EmergencyOverride::new(store.clone(), clock.clone(), alerts.clone()),
            transition: MembershipTransitionBatcher::new(
                store.clone(),
                clock.clone(),
                alerts,
                &config.membership,
            ),
            role_transfer: RoleTransferCoordinator::new(store.clone(), clock.clone()),
            store,
            clock,
            matcher,
            monitor,
            eta,
            max_attempts,
        }
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub fn matcher(&self) -> Arc<DispatchMatcher> {
        self.matcher.clone()
    }

    pub fn monitor(&self) -> Arc<ActivityMonitor> {
        self.monitor.clone()
    }

    #[instrument(skip(self, pickup))]
    pub async fn create_request(&self, requester_id: &str, pickup: Pickup) -> DispatchResult<Request> {
        let requester = queries::fetch_member(self.store.as_ref(), requester_id).await?.value;
        if queries::requester_has_active_request(self.store.as_ref(), requester_id).await? {
            return Err(DispatchError::validation(format!(
                "成员 {requester_id} 已有未完成的出行请求"
            )));
        }

        let now = self.clock.now();
        let request = Request::new(
            requester.group_id,
            requester.id,
            requester.tier,
            pickup,
            priority::score(requester.tier, 0.0, false),
            now,
        );
        let mut batch = WriteBatch::new();
        batch.insert(&request)?;
        self.store.commit(batch).await?;

        info!(
            "已创建出行请求 {} (分组: {}, 优先级: {})",
            request.id, request.group_id, request.priority
        );
        Ok(request)
    }

    pub async fn create_emergency_request(
        &self,
        requester_id: &str,
        pickup: Pickup,
        reason: &str,
    ) -> DispatchResult<Request> {
        self.emergency.create_emergency(requester_id, pickup, reason).await
    }

    /// 取消请求；已绑定的司机会话同时更新，以便为释放的运力重新匹配
    #[instrument(skip(self))]
    pub async fn cancel_request(&self, request_id: &str, reason: Option<String>) -> DispatchResult<Request> {
        self.with_retry("取消请求", || {
            let reason = reason.clone();
            async move {
                let current = queries::fetch_request(self.store.as_ref(), request_id).await?;
                let released_driver = current.value.driver_id.clone();

                let mut cancelled = current.value.clone();
                cancelled.cancel(reason, self.clock.now())?;

                let mut batch = WriteBatch::new();
                batch.update(&cancelled, current.version)?;
                if let Some(driver_id) = released_driver.as_deref() {
                    match queries::open_session_for(self.store.as_ref(), driver_id).await? {
                        Some(session) => {
                            batch.update(&session.value, session.version)?;
                        }
                        None => debug!("司机 {} 已无值班会话，无需重新匹配", driver_id),
                    }
                }
                self.store.commit(batch).await?;

                info!("已取消出行请求 {}", request_id);
                Ok(cancelled)
            }
        })
        .await
    }

    /// Bound → EnRoute（记录接驾时间）或 EnRoute → Completed
    #[instrument(skip(self))]
    pub async fn advance_request_status(
        &self,
        request_id: &str,
        driver_location: Option<GeoPoint>,
    ) -> DispatchResult<Request> {
        let snapshot = queries::fetch_request(self.store.as_ref(), request_id).await?.value;
        // 外部调用放在事务之外，重试时复用
        let eta = match snapshot.status {
            RequestStatus::Bound => Some(
                self.eta
                    .resolve(driver_location.as_ref(), &snapshot.pickup.location)
                    .await,
            ),
            _ => None,
        };

        self.with_retry("推进请求状态", || async move {
            let current = queries::fetch_request(self.store.as_ref(), request_id).await?;
            let now = self.clock.now();
            let mut advanced = current.value.clone();
            let mut batch = WriteBatch::new();

            match current.value.status {
                RequestStatus::Bound => {
                    let eta = eta.unwrap_or_else(|| self.eta.default_minutes());
                    advanced.start_enroute(eta, now)?;
                    batch.update(&advanced, current.version)?;
                }
                RequestStatus::EnRoute => {
                    advanced.complete(now)?;
                    batch.update(&advanced, current.version)?;
                    if let Some(driver_id) = advanced.driver_id.as_deref() {
                        if let Some(session) =
                            queries::open_session_for(self.store.as_ref(), driver_id).await?
                        {
                            let mut session_value = session.value.clone();
                            session_value.completed_count += 1;
                            batch.update(&session_value, session.version)?;
                        }
                    }
                }
                status => {
                    return Err(DispatchError::validation(format!(
                        "出行请求 {} 处于 {}，无法推进",
                        request_id,
                        status.as_str()
                    )));
                }
            }
            self.store.commit(batch).await?;

            info!(
                "出行请求 {} 状态 {} -> {}",
                request_id,
                current.value.status.as_str(),
                advanced.status.as_str()
            );
            Ok(advanced)
        })
        .await
    }

    pub async fn toggle_driver_availability(
        &self,
        driver_id: &str,
        available: bool,
    ) -> DispatchResult<ToggleOutcome> {
        self.monitor.apply_toggle(driver_id, available).await
    }

    #[instrument(skip(self))]
    pub async fn open_driver_session(&self, driver_id: &str, group_id: &str) -> DispatchResult<DriverSession> {
        let driver = queries::fetch_member(self.store.as_ref(), driver_id).await?.value;
        if driver.group_id != group_id {
            return Err(DispatchError::validation(format!(
                "司机 {driver_id} 不属于分组 {group_id}"
            )));
        }
        if let Some(existing) = queries::open_session_for(self.store.as_ref(), driver_id).await? {
            return Err(DispatchError::validation(format!(
                "司机 {} 已有进行中的值班会话 {}",
                driver_id, existing.value.session_id
            )));
        }

        let session = DriverSession::new(driver.id, driver.group_id, self.clock.now());
        let mut batch = WriteBatch::new();
        batch.insert(&session)?;
        self.store.commit(batch).await?;

        info!("司机 {} 开始值班 (会话: {})", driver_id, session.session_id);
        Ok(session)
    }

    #[instrument(skip(self))]
    pub async fn close_driver_session(&self, driver_id: &str) -> DispatchResult<DriverSession> {
        self.with_retry("结束值班", || async move {
            let current = queries::open_session_for(self.store.as_ref(), driver_id)
                .await?
                .ok_or_else(|| DispatchError::session_not_found(driver_id))?;
            let mut closed = current.value.clone();
            closed.close(self.clock.now());

            let mut batch = WriteBatch::new();
            batch.update(&closed, current.version)?;
            self.store.commit(batch).await?;

            let pending = queries::active_requests_of_driver(self.store.as_ref(), driver_id).await?;
            if !pending.is_empty() {
                warn!("司机 {} 结束值班时仍有 {} 个进行中的请求", driver_id, pending.len());
            }
            info!("司机 {} 结束值班 (会话: {})", driver_id, closed.session_id);
            Ok(closed)
        })
        .await
    }

    pub async fn list_open_requests(&self, group_id: &str) -> DispatchResult<Vec<QueuedRequest>> {
        let open_set = self.open_set(group_id).await?;
        Ok(queue::ordered(&open_set, self.clock.now()))
    }

    pub async fn get_queue_position(&self, request_id: &str) -> DispatchResult<QueuePosition> {
        let request = queries::fetch_request(self.store.as_ref(), request_id).await?.value;
        let open_set = self.open_set(&request.group_id).await?;
        let now = self.clock.now();
        let rank = queue::rank(request_id, &open_set, now)?;

        let driver_wait_minutes = request
            .driver_id
            .as_deref()
            .map(|driver_id| wait_time::estimate(driver_id, &open_set));
        Ok(QueuePosition {
            request_id: request.id.clone(),
            status: request.status,
            rank,
            queue_length: open_set.len(),
            score: priority::live_score(&request, now),
            driver_wait_minutes,
        })
    }

    pub async fn execute_annual_transition(&self, group_id: &str) -> DispatchResult<TransitionLog> {
        self.transition.execute_annual_transition(group_id).await
    }

    pub async fn transfer_admin_role(
        &self,
        from_id: &str,
        to_id: &str,
        group_id: &str,
    ) -> DispatchResult<RoleTransferLog> {
        self.role_transfer.transfer_role(from_id, to_id, group_id).await
    }

    async fn open_set(&self, group_id: &str) -> DispatchResult<Vec<Request>> {
        Ok(queries::queued_requests(self.store.as_ref(), group_id)
            .await?
            .into_iter()
            .map(|r| r.value)
            .collect())
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> DispatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = DispatchResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(e) if e.is_conflict() && attempt < self.max_attempts => {
                    debug!("{}发生并发冲突，重试第 {} 次", operation, attempt);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
