use std::time::Duration;

use async_trait::async_trait;
use saferide_domain::entities::GeoPoint;
use saferide_domain::ports::RoutingService;
use saferide_errors::{DispatchError, DispatchResult};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TravelTimeResponse {
    minutes: u32,
}

/// 通过HTTP调用外部路线服务估算行驶时间
///
/// 请求格式: `GET {base_url}?from=lat,lng&to=lat,lng`，响应 `{"minutes": n}`。
pub struct HttpRoutingService {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpRoutingService {
    pub fn new(base_url: &str, request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("saferide/1.0")
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.to_string(),
            http_client,
        }
    }

    fn format_point(point: &GeoPoint) -> String {
        format!("{},{}", point.lat, point.lng)
    }
}

#[async_trait]
impl RoutingService for HttpRoutingService {
    async fn travel_minutes(&self, from: &GeoPoint, to: &GeoPoint) -> DispatchResult<u32> {
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("from", Self::format_point(from)),
                ("to", Self::format_point(to)),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(format!("路线服务请求超时: {e}"))
                } else {
                    DispatchError::ExternalService(format!("路线服务请求失败: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(DispatchError::ExternalService(format!(
                "路线服务返回错误状态: {}",
                response.status()
            )));
        }

        let body: TravelTimeResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::ExternalService(format!("路线服务响应解析失败: {e}")))?;

        debug!("路线服务估算行驶时间: {} 分钟", body.minutes);
        Ok(body.minutes)
    }
}
