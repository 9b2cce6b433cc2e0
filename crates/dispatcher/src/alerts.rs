use std::sync::Arc;

use tracing::{debug, warn};

use saferide_domain::ports::NotificationService;
use saferide_domain::store::{DocumentStore, WriteBatch};
use saferide_domain::AlertRecord;
use saferide_errors::DispatchResult;

use crate::queries;

/// 告警的收件人解析与投递
///
/// 告警先与触发它的状态变更一起持久化，再交给通知服务。投递失败只记录日志，
/// 不影响主流程。
pub struct AlertPublisher {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn NotificationService>,
}

impl AlertPublisher {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn NotificationService>) -> Self {
        Self { store, notifier }
    }

    pub async fn recipients(&self, group_id: &str) -> DispatchResult<Vec<String>> {
        queries::group_admin_ids(self.store.as_ref(), group_id).await
    }

    /// 投递已持久化的告警，返回成功通知的数量
    pub async fn deliver(&self, alerts: &[AlertRecord]) -> usize {
        let mut notified = 0;
        for alert in alerts {
            if let Err(e) = self.notifier.deliver(alert).await {
                warn!("告警 {} 投递失败: {}", alert.id, e);
                continue;
            }

            match self.mark_notified(alert).await {
                Ok(()) => notified += 1,
                Err(e) => warn!("告警 {} 已投递但标记失败: {}", alert.id, e),
            }
        }
        debug!("投递告警 {}/{}", notified, alerts.len());
        notified
    }

    async fn mark_notified(&self, alert: &AlertRecord) -> DispatchResult<()> {
        let mut delivered = alert.clone();
        delivered.notified = true;
        let mut batch = WriteBatch::new();
        // 告警只在创建时写入过一次
        batch.update(&delivered, 1)?;
        self.store.commit(batch).await
    }
}
