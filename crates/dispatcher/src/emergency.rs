use std::sync::Arc;

use tracing::{info, instrument};

use saferide_domain::ports::Clock;
use saferide_domain::store::{DocumentStore, WriteBatch};
use saferide_domain::{AlertRecord, AlertType, Pickup, Request};
use saferide_errors::{DispatchError, DispatchResult};

use crate::alerts::AlertPublisher;
use crate::queries;

/// 紧急请求通道
///
/// 请求以哨兵优先级进入普通队列，由下一次匹配触发处理；同时生成发给管理员的告警。
pub struct EmergencyOverride {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    alerts: Arc<AlertPublisher>,
}

impl EmergencyOverride {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, alerts: Arc<AlertPublisher>) -> Self {
        Self { store, clock, alerts }
    }

    #[instrument(skip(self, pickup, reason))]
    pub async fn create_emergency(
        &self,
        requester_id: &str,
        pickup: Pickup,
        reason: &str,
    ) -> DispatchResult<Request> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DispatchError::validation("紧急请求必须填写原因"));
        }
        let requester = queries::fetch_member(self.store.as_ref(), requester_id).await?.value;
        let now = self.clock.now();

        let request = Request::emergency(
            requester.group_id.clone(),
            requester.id.clone(),
            requester.tier,
            pickup,
            reason.to_string(),
            now,
        );
        let recipients = self.alerts.recipients(&requester.group_id).await?;
        let alert = AlertRecord::new(
            requester.group_id.clone(),
            AlertType::EmergencyRequest,
            format!(
                "{} ({}) 发起紧急请求，上车点: {} ({:.5}, {:.5})，原因: {}",
                requester.display_name,
                requester.id,
                request.pickup.address,
                request.pickup.location.lat,
                request.pickup.location.lng,
                reason
            ),
            now,
        )
        .with_request(&request.id)
        .with_recipients(recipients);

        let mut batch = WriteBatch::new();
        batch.insert(&request)?;
        batch.insert(&alert)?;
        self.store.commit(batch).await?;

        info!(
            "已创建紧急请求 {} (请求人: {}, 分组: {})",
            request.id, requester.id, requester.group_id
        );
        self.alerts.deliver(std::slice::from_ref(&alert)).await;
        Ok(request)
    }
}
