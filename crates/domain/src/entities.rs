use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use saferide_errors::{DispatchError, DispatchResult};

/// 紧急请求使用的固定优先级，保证排在队首
pub const SENTINEL_PRIORITY: f64 = 9999.0;
/// 单个出行任务的平均耗时（分钟）
pub const AVERAGE_JOB_MINUTES: u32 = 15;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// 上车点，由定位协作方一次性提供
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pickup {
    pub location: GeoPoint,
    pub address: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "BOUND")]
    Bound,
    #[serde(rename = "EN_ROUTE")]
    EnRoute,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "OPEN",
            RequestStatus::Bound => "BOUND",
            RequestStatus::EnRoute => "EN_ROUTE",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
    /// 已分配司机且尚未结束，计入司机的等待时间
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Bound | RequestStatus::EnRoute)
    }
    /// 参与排队名次计算的状态
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            RequestStatus::Open | RequestStatus::Bound | RequestStatus::EnRoute
        )
    }
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (*self, next),
            (Open, Bound)
                | (Bound, EnRoute)
                | (EnRoute, Completed)
                | (Open | Bound | EnRoute, Cancelled)
        )
    }
}

impl From<RequestStatus> for serde_json::Value {
    fn from(status: RequestStatus) -> Self {
        serde_json::Value::String(status.as_str().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: String,
    pub group_id: String,
    pub requester_id: String,
    /// 创建时的请求人年级快照，用于优先级计算
    pub requester_tier: u32,
    pub driver_id: Option<String>,
    pub pickup: Pickup,
    pub status: RequestStatus,
    pub priority: f64,
    pub is_emergency: bool,
    pub reason: Option<String>,
    pub eta_minutes: Option<u32>,
    pub requested_at: DateTime<Utc>,
    pub bound_at: Option<DateTime<Utc>>,
    pub enroute_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl Request {
    pub fn new(
        group_id: String,
        requester_id: String,
        requester_tier: u32,
        pickup: Pickup,
        priority: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id,
            requester_id,
            requester_tier,
            driver_id: None,
            pickup,
            status: RequestStatus::Open,
            priority,
            is_emergency: false,
            reason: None,
            eta_minutes: None,
            requested_at: now,
            bound_at: None,
            enroute_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    pub fn emergency(
        group_id: String,
        requester_id: String,
        requester_tier: u32,
        pickup: Pickup,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        let mut request = Self::new(
            group_id,
            requester_id,
            requester_tier,
            pickup,
            SENTINEL_PRIORITY,
            now,
        );
        request.is_emergency = true;
        request.reason = Some(reason);
        request
    }

    pub fn wait_minutes(&self, now: DateTime<Utc>) -> f64 {
        let waited = (now - self.requested_at).num_seconds().max(0);
        waited as f64 / 60.0
    }

    fn ensure_transition(&self, next: RequestStatus) -> DispatchResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DispatchError::validation(format!(
                "出行请求 {} 无法从 {} 转换为 {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        Ok(())
    }

    pub fn bind(&mut self, driver_id: &str, now: DateTime<Utc>) -> DispatchResult<()> {
        self.ensure_transition(RequestStatus::Bound)?;
        self.status = RequestStatus::Bound;
        self.driver_id = Some(driver_id.to_string());
        self.bound_at = Some(now);
        Ok(())
    }

    pub fn start_enroute(&mut self, eta_minutes: u32, now: DateTime<Utc>) -> DispatchResult<()> {
        self.ensure_transition(RequestStatus::EnRoute)?;
        self.status = RequestStatus::EnRoute;
        self.enroute_at = Some(now);
        self.eta_minutes = Some(eta_minutes);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> DispatchResult<()> {
        self.ensure_transition(RequestStatus::Completed)?;
        self.status = RequestStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }

    /// 取消后不再关联司机
    pub fn cancel(&mut self, reason: Option<String>, now: DateTime<Utc>) -> DispatchResult<()> {
        self.ensure_transition(RequestStatus::Cancelled)?;
        self.status = RequestStatus::Cancelled;
        self.driver_id = None;
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        Ok(())
    }
}

/// 司机的一次值班会话
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverSession {
    pub session_id: String,
    pub driver_id: String,
    pub group_id: String,
    pub available: bool,
    pub toggle_count: u32,
    pub last_available_at: Option<DateTime<Utc>>,
    pub last_unavailable_at: Option<DateTime<Utc>>,
    pub last_reset_at: Option<DateTime<Utc>>,
    /// 每次绑定都会写入，用于版本校验发现并发绑定
    pub last_bound_at: Option<DateTime<Utc>>,
    pub abuse_alerted_at: Option<DateTime<Utc>>,
    pub inactivity_alerted_at: Option<DateTime<Utc>>,
    pub completed_count: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl DriverSession {
    /// 新会话默认处于可接单状态
    pub fn new(driver_id: String, group_id: String, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            driver_id,
            group_id,
            available: true,
            toggle_count: 0,
            last_available_at: Some(now),
            last_unavailable_at: None,
            last_reset_at: None,
            last_bound_at: None,
            abuse_alerted_at: None,
            inactivity_alerted_at: None,
            completed_count: 0,
            started_at: now,
            ended_at: None,
        }
    }
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
    pub fn can_accept_requests(&self) -> bool {
        self.available && self.is_open()
    }
    pub fn close(&mut self, now: DateTime<Utc>) {
        self.ended_at = Some(now);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

impl From<Role> for serde_json::Value {
    fn from(role: Role) -> Self {
        match role {
            Role::Member => serde_json::Value::String("member".to_string()),
            Role::Admin => serde_json::Value::String("admin".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: String,
    pub group_id: String,
    pub display_name: String,
    pub tier: u32,
    pub role: Role,
}

impl Member {
    pub fn new(group_id: String, display_name: String, tier: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id,
            display_name,
            tier,
            role: Role::Member,
        }
    }
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AlertType {
    ToggleAbuse,
    ProlongedInactivity,
    EmergencyRequest,
    TransitionNotice,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ToggleAbuse => "toggle_abuse",
            AlertType::ProlongedInactivity => "prolonged_inactivity",
            AlertType::EmergencyRequest => "emergency_request",
            AlertType::TransitionNotice => "transition_notice",
        }
    }
}

/// 告警记录，创建后仅 `is_read` 与 `notified` 可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRecord {
    pub id: String,
    pub group_id: String,
    pub alert_type: AlertType,
    pub message: String,
    pub related_driver_id: Option<String>,
    pub related_request_id: Option<String>,
    pub recipient_ids: Vec<String>,
    pub is_read: bool,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl AlertRecord {
    pub fn new(
        group_id: String,
        alert_type: AlertType,
        message: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id,
            alert_type,
            message,
            related_driver_id: None,
            related_request_id: None,
            recipient_ids: Vec::new(),
            is_read: false,
            notified: false,
            created_at: now,
        }
    }
    pub fn with_driver(mut self, driver_id: &str) -> Self {
        self.related_driver_id = Some(driver_id.to_string());
        self
    }
    pub fn with_request(mut self, request_id: &str) -> Self {
        self.related_request_id = Some(request_id.to_string());
        self
    }
    pub fn with_recipients(mut self, recipient_ids: Vec<String>) -> Self {
        self.recipient_ids = recipient_ids;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransitionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "FAILED")]
    Failed,
    /// 执行中占位；中断后保留此状态，需要人工核对
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
}

/// 年度年级转换的审计记录，每个分组每个周期一条
///
/// 开始执行前以 `IN_PROGRESS` 写入，结束时改为最终状态，之后不再修改。
/// 只有 `FAILED` 的记录会在重跑时另存并让出周期记录。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionLog {
    pub id: String,
    pub group_id: String,
    pub cycle: i32,
    pub seniors_removed: u32,
    pub users_advanced: u32,
    pub chunks_total: u32,
    pub chunks_failed: u32,
    pub status: TransitionStatus,
    pub error_summary: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl TransitionLog {
    pub fn cycle_id(group_id: &str, cycle: i32) -> String {
        format!("{group_id}-{cycle}")
    }

    /// 本周期还未产生任何结果的占位记录
    pub fn in_progress(group_id: &str, cycle: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::cycle_id(group_id, cycle),
            group_id: group_id.to_string(),
            cycle,
            seniors_removed: 0,
            users_advanced: 0,
            chunks_total: 0,
            chunks_failed: 0,
            status: TransitionStatus::InProgress,
            error_summary: None,
            executed_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoleTransferStatus {
    #[serde(rename = "COMPLETED")]
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleTransferLog {
    pub id: String,
    pub group_id: String,
    pub from_member_id: String,
    pub to_member_id: String,
    pub status: RoleTransferStatus,
    pub transferred_at: DateTime<Utc>,
}
