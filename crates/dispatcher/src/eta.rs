use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use saferide_config::ExternalConfig;
use saferide_domain::ports::RoutingService;
use saferide_domain::GeoPoint;

/// 接驾时间估算，外部服务失败或超时一律使用默认值
#[derive(Clone)]
pub struct EtaResolver {
    routing: Option<Arc<dyn RoutingService>>,
    timeout: Duration,
    default_minutes: u32,
}

impl EtaResolver {
    pub fn new(routing: Option<Arc<dyn RoutingService>>, timeout: Duration, default_minutes: u32) -> Self {
        Self {
            routing,
            timeout,
            default_minutes,
        }
    }

    pub fn from_config(routing: Option<Arc<dyn RoutingService>>, config: &ExternalConfig) -> Self {
        Self::new(
            routing,
            Duration::from_millis(config.request_timeout_ms),
            config.default_eta_minutes,
        )
    }

    /// 未配置路线服务
    pub fn fallback_only(default_minutes: u32) -> Self {
        Self::new(None, Duration::from_secs(0), default_minutes)
    }

    pub fn default_minutes(&self) -> u32 {
        self.default_minutes
    }

    pub async fn resolve(&self, from: Option<&GeoPoint>, to: &GeoPoint) -> u32 {
        let (Some(routing), Some(from)) = (self.routing.as_ref(), from) else {
            debug!("无路线服务或司机位置，使用默认接驾时间 {} 分钟", self.default_minutes);
            return self.default_minutes;
        };

        match tokio::time::timeout(self.timeout, routing.travel_minutes(from, to)).await {
            Ok(Ok(minutes)) => minutes,
            Ok(Err(e)) => {
                warn!("路线服务调用失败，使用默认值 {} 分钟: {}", self.default_minutes, e);
                self.default_minutes
            }
            Err(_) => {
                warn!(
                    "路线服务 {:?} 内未响应，使用默认值 {} 分钟",
                    self.timeout, self.default_minutes
                );
                self.default_minutes
            }
        }
    }
}
