use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use saferide_config::MonitorConfig;
use saferide_domain::ports::Clock;
use saferide_domain::store::{DocumentStore, Versioned, WriteBatch};
use saferide_domain::{AlertRecord, AlertType, DriverSession};
use saferide_errors::{DispatchError, DispatchResult};

use crate::alerts::AlertPublisher;
use crate::queries;

/// 司机活跃度检查阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityThresholds {
    /// 窗口内切换次数超过该值视为滥用
    pub toggle_abuse_threshold: u32,
    pub toggle_window: Duration,
    pub inactivity_threshold: Duration,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for ActivityThresholds {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            toggle_abuse_threshold: config.toggle_abuse_threshold,
            toggle_window: Duration::minutes(config.toggle_window_minutes),
            inactivity_threshold: Duration::minutes(config.inactivity_threshold_minutes),
        }
    }
}

/// 可接单状态切换
///
/// 切到不可接单时计数加一；计数从0开始时同时开启新的计数窗口。
/// 状态未变化时返回 `false`。
pub fn record_toggle(
    session: &mut DriverSession,
    available: bool,
    now: DateTime<Utc>,
) -> DispatchResult<bool> {
    if !session.is_open() {
        return Err(DispatchError::validation(format!(
            "值班会话 {} 已结束，无法切换状态",
            session.session_id
        )));
    }
    if session.available == available {
        return Ok(false);
    }

    if available {
        session.available = true;
        session.last_available_at = Some(now);
        session.last_unavailable_at = None;
        session.inactivity_alerted_at = None;
    } else {
        if session.toggle_count == 0 {
            session.last_reset_at = Some(now);
        }
        session.available = false;
        session.toggle_count += 1;
        session.last_unavailable_at = Some(now);
    }
    Ok(true)
}

/// 窗口到期时清零切换计数
///
/// 参考时间为上次清零时间，从未清零时取最近一次切到不可接单的时间。
pub fn auto_reset_toggle_counter(
    session: &mut DriverSession,
    now: DateTime<Utc>,
    thresholds: &ActivityThresholds,
) -> bool {
    if session.toggle_count == 0 && session.abuse_alerted_at.is_none() {
        return false;
    }
    let Some(reference) = session.last_reset_at.or(session.last_unavailable_at) else {
        return false;
    };
    if now - reference < thresholds.toggle_window {
        return false;
    }

    debug!(
        "司机 {} 切换计数 {} 已清零",
        session.driver_id, session.toggle_count
    );
    session.toggle_count = 0;
    session.last_reset_at = Some(now);
    session.abuse_alerted_at = None;
    true
}

/// 每个计数窗口最多产生一条滥用告警
pub fn check_toggle_abuse(
    session: &mut DriverSession,
    now: DateTime<Utc>,
    thresholds: &ActivityThresholds,
) -> Option<AlertRecord> {
    if session.toggle_count <= thresholds.toggle_abuse_threshold || session.abuse_alerted_at.is_some() {
        return None;
    }
    let last_unavailable = session.last_unavailable_at?;
    if now - last_unavailable > thresholds.toggle_window {
        return None;
    }

    session.abuse_alerted_at = Some(now);
    Some(
        AlertRecord::new(
            session.group_id.clone(),
            AlertType::ToggleAbuse,
            format!(
                "司机 {} 在 {} 分钟内切换可接单状态 {} 次",
                session.driver_id,
                thresholds.toggle_window.num_minutes(),
                session.toggle_count
            ),
            now,
        )
        .with_driver(&session.driver_id),
    )
}

/// 值班期间不可接单超过阈值；每段不可接单时间最多告警一次
pub fn check_prolonged_inactivity(
    session: &mut DriverSession,
    session_still_open: bool,
    now: DateTime<Utc>,
    thresholds: &ActivityThresholds,
) -> Option<AlertRecord> {
    if session.available || !session_still_open || session.inactivity_alerted_at.is_some() {
        return None;
    }
    let idle = now - session.last_unavailable_at?;
    if idle <= thresholds.inactivity_threshold {
        return None;
    }

    session.inactivity_alerted_at = Some(now);
    Some(
        AlertRecord::new(
            session.group_id.clone(),
            AlertType::ProlongedInactivity,
            format!(
                "司机 {} 已连续 {} 分钟处于不可接单状态",
                session.driver_id,
                idle.num_minutes()
            ),
            now,
        )
        .with_driver(&session.driver_id),
    )
}

/// 依次执行清零、滥用检查和离线检查
pub fn run_checks(
    session: &mut DriverSession,
    now: DateTime<Utc>,
    thresholds: &ActivityThresholds,
) -> Vec<AlertRecord> {
    auto_reset_toggle_counter(session, now, thresholds);
    let open = session.is_open();
    check_toggle_abuse(session, now, thresholds)
        .into_iter()
        .chain(check_prolonged_inactivity(session, open, now, thresholds))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleOutcome {
    pub session: DriverSession,
    pub changed: bool,
    pub alerts: Vec<AlertRecord>,
}

/// 司机活跃度监控
///
/// 会话的状态变化与产生的告警在同一批次中提交。
pub struct ActivityMonitor {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    alerts: Arc<AlertPublisher>,
    thresholds: ActivityThresholds,
    max_attempts: u32,
}

impl ActivityMonitor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        alerts: Arc<AlertPublisher>,
        thresholds: ActivityThresholds,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            alerts,
            thresholds,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn thresholds(&self) -> &ActivityThresholds {
        &self.thresholds
    }

    async fn persist(
        &self,
        session: &DriverSession,
        version: u64,
        mut alerts: Vec<AlertRecord>,
    ) -> DispatchResult<Vec<AlertRecord>> {
        if !alerts.is_empty() {
            let recipients = self.alerts.recipients(&session.group_id).await?;
            for alert in &mut alerts {
                alert.recipient_ids = recipients.clone();
            }
        }

        let mut batch = WriteBatch::new();
        batch.update(session, version)?;
        for alert in &alerts {
            batch.insert(alert)?;
        }
        self.store.commit(batch).await?;

        for alert in &alerts {
            counter!("activity_alerts_total", "type" => alert.alert_type.as_str()).increment(1);
            warn!("司机活跃度告警 [{}]: {}", alert.alert_type.as_str(), alert.message);
        }
        Ok(alerts)
    }

    /// 检查单个会话，有变化时持久化并投递告警
    pub async fn evaluate_session(
        &self,
        session: Versioned<DriverSession>,
    ) -> DispatchResult<Vec<AlertRecord>> {
        let now = self.clock.now();
        let mut updated = session.value.clone();
        let alerts = run_checks(&mut updated, now, &self.thresholds);
        if updated == session.value {
            return Ok(Vec::new());
        }

        let alerts = self.persist(&updated, session.version, alerts).await?;
        self.alerts.deliver(&alerts).await;
        Ok(alerts)
    }

    /// 切换司机可接单状态并立即执行全部检查
    pub async fn apply_toggle(&self, driver_id: &str, available: bool) -> DispatchResult<ToggleOutcome> {
        for attempt in 1..=self.max_attempts {
            let current = queries::open_session_for(self.store.as_ref(), driver_id)
                .await?
                .ok_or_else(|| DispatchError::session_not_found(driver_id))?;

            let now = self.clock.now();
            let mut session = current.value.clone();
            // 过期的计数先清零，本次切换计入新窗口
            auto_reset_toggle_counter(&mut session, now, &self.thresholds);
            let changed = record_toggle(&mut session, available, now)?;
            let alerts = run_checks(&mut session, now, &self.thresholds);
            if session == current.value {
                return Ok(ToggleOutcome {
                    session,
                    changed: false,
                    alerts: Vec::new(),
                });
            }

            match self.persist(&session, current.version, alerts).await {
                Ok(alerts) => {
                    info!(
                        "司机 {} 切换为{} (计数: {})",
                        driver_id,
                        if available { "可接单" } else { "不可接单" },
                        session.toggle_count
                    );
                    self.alerts.deliver(&alerts).await;
                    return Ok(ToggleOutcome {
                        session,
                        changed,
                        alerts,
                    });
                }
                Err(e) if e.is_conflict() && attempt < self.max_attempts => {
                    debug!("司机 {} 状态切换冲突，重试第 {} 次", driver_id, attempt);
                }
                Err(e) => return Err(e),
            }
        }
        Err(DispatchError::conflict(format!("司机 {driver_id} 状态切换多次冲突")))
    }

    /// 对所有未结束的会话执行一轮检查，返回产生的告警数
    pub async fn poll_once(&self) -> DispatchResult<usize> {
        let sessions = queries::open_sessions(self.store.as_ref(), None).await?;
        let mut raised = 0;
        for session in sessions {
            let driver_id = session.value.driver_id.clone();
            match self.evaluate_session(session).await {
                Ok(alerts) => raised += alerts.len(),
                // 会话刚被其他操作修改，下一轮再检查
                Err(e) if e.is_conflict() => debug!("跳过司机 {} 的本轮检查: {}", driver_id, e),
                Err(e) => error!("检查司机 {} 活跃度时出错: {}", driver_id, e),
            }
        }
        Ok(raised)
    }
}

/// 定时执行活跃度检查，捕捉没有切换事件的长时间离线
pub struct ActivityPoller {
    monitor: Arc<ActivityMonitor>,
    interval: StdDuration,
}

impl ActivityPoller {
    pub fn new(monitor: Arc<ActivityMonitor>, interval: StdDuration) -> Self {
        Self { monitor, interval }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("启动司机活跃度轮询，间隔 {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出司机活跃度轮询");
                    break;
                }
                _ = ticker.tick() => {
                    match self.monitor.poll_once().await {
                        Ok(0) => {}
                        Ok(raised) => info!("本轮活跃度检查产生 {} 条告警", raised),
                        Err(e) => error!("司机活跃度轮询出错: {}", e),
                    }
                }
            }
        }
    }
}
