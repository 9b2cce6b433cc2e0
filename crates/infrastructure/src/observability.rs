use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// 安装Prometheus指标导出器
///
/// 必须在tokio运行时内调用，监听地址上提供 `/metrics` 抓取端点。
pub fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus导出器失败: {}", e))?;

    info!("Prometheus指标导出器监听 {}", addr);
    Ok(())
}

/// 预先登记指标说明，抓取端点在首次计数前也能列出它们
pub fn describe_dispatch_metrics() {
    metrics::describe_counter!("dispatch_bindings_total", "成功绑定的出行请求数");
    metrics::describe_counter!("dispatch_conflicts_total", "绑定时发生的乐观锁冲突次数");
    metrics::describe_counter!("activity_alerts_total", "司机活跃度告警数，按类型区分");
    metrics::describe_counter!("transition_chunks_failed_total", "年度转换中提交失败的分块数");
    metrics::describe_counter!("dispatch_triggers_total", "调度worker处理的触发信号数，按原因区分");
}
