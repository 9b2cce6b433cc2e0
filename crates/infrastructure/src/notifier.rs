use async_trait::async_trait;
use saferide_domain::entities::AlertRecord;
use saferide_domain::ports::NotificationService;
use saferide_errors::DispatchResult;
use tracing::info;

/// 只写日志的通知实现，未接入短信/推送通道时使用
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationService for LoggingNotifier {
    async fn deliver(&self, alert: &AlertRecord) -> DispatchResult<()> {
        info!(
            alert.id = %alert.id,
            alert.group_id = %alert.group_id,
            alert.type = alert.alert_type.as_str(),
            alert.recipients = alert.recipient_ids.len(),
            "告警通知: {}",
            alert.message
        );
        Ok(())
    }
}
