use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 消费触发队列的并发worker数量
    pub worker_count: usize,
    pub trigger_queue_capacity: usize,
    /// 一次触发内绑定失败后的最大重试次数
    pub max_bind_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_count: 4,
            trigger_queue_capacity: 1024,
            max_bind_attempts: 3,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            return Err(anyhow::anyhow!("调度worker数量必须大于0"));
        }

        if self.trigger_queue_capacity == 0 {
            return Err(anyhow::anyhow!("触发队列容量必须大于0"));
        }

        if self.max_bind_attempts == 0 || self.max_bind_attempts > 10 {
            return Err(anyhow::anyhow!(
                "绑定重试次数必须在1到10之间: {}",
                self.max_bind_attempts
            ));
        }

        Ok(())
    }
}

/// 司机活跃度监控阈值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_seconds: u64,
    /// 切换次数超过该值视为滥用
    pub toggle_abuse_threshold: u32,
    pub toggle_window_minutes: i64,
    pub inactivity_threshold_minutes: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 300,
            toggle_abuse_threshold: 5,
            toggle_window_minutes: 30,
            inactivity_threshold_minutes: 15,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("活跃度轮询间隔必须大于0"));
        }

        if self.toggle_window_minutes <= 0 {
            return Err(anyhow::anyhow!("切换计数窗口必须大于0分钟"));
        }

        if self.inactivity_threshold_minutes <= 0 {
            return Err(anyhow::anyhow!("长时间离线阈值必须大于0分钟"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// 最高年级，达到后在年度转换中移除
    pub max_tier: u32,
    pub transition_chunk_size: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            max_tier: 4,
            transition_chunk_size: 500,
        }
    }
}

impl MembershipConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_tier == 0 {
            return Err(anyhow::anyhow!("最高年级必须大于0"));
        }

        if self.transition_chunk_size == 0 {
            return Err(anyhow::anyhow!("年度转换分块大小必须大于0"));
        }

        Ok(())
    }
}
