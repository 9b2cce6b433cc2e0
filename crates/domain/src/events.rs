//! 领域事件
//!
//! 存储变更通知与调度触发信号，用于存储层与调度器之间解耦

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Collection;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// 一次成功提交后每个被写入文档对应一条变更事件
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub id: String,
    pub kind: ChangeKind,
    pub version: u64,
    /// 删除事件为 `None`
    pub data: Option<Value>,
}

impl ChangeEvent {
    pub fn group_id(&self) -> Option<&str> {
        self.data.as_ref()?.get("group_id")?.as_str()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TriggerReason {
    /// 出现新的待分配请求
    NewRequest,
    /// 司机可接单状态或完成单数发生变化
    DriverChanged,
    /// 运维或启动时手动触发
    Manual,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::NewRequest => "new_request",
            TriggerReason::DriverChanged => "driver_changed",
            TriggerReason::Manual => "manual",
        }
    }
}

/// 投递到调度工作队列的信号，消费者对整个分组重新执行匹配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTrigger {
    pub group_id: String,
    pub reason: TriggerReason,
    pub occurred_at: DateTime<Utc>,
}

impl DispatchTrigger {
    pub fn new(group_id: impl Into<String>, reason: TriggerReason, occurred_at: DateTime<Utc>) -> Self {
        Self {
            group_id: group_id.into(),
            reason,
            occurred_at,
        }
    }
}
