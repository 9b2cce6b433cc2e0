//! 外部协作方接口
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{AlertRecord, GeoPoint};
use saferide_errors::DispatchResult;

/// 时钟，测试中注入可控实现
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 路线/到达时间估算服务
#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn travel_minutes(&self, from: &GeoPoint, to: &GeoPoint) -> DispatchResult<u32>;
}

/// 告警消息投递服务；投递结果仅用于标记 `notified`
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn deliver(&self, alert: &AlertRecord) -> DispatchResult<()>;
}
