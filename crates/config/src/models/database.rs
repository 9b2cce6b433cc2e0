use serde::{Deserialize, Serialize};

/// 文档存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory` 使用进程内存储，`sqlite:` 前缀使用SQLite
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
    /// 单个原子事务允许的最大写操作数
    pub max_batch_ops: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
            max_connections: 5,
            connection_timeout_seconds: 30,
            max_batch_ops: 500,
        }
    }
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url == "memory"
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        if !self.is_in_memory() && !self.url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!(
                "数据库URL必须是 memory 或 sqlite: 格式: {}",
                self.url
            ));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        if self.max_batch_ops == 0 {
            return Err(anyhow::anyhow!("单事务最大写操作数必须大于0"));
        }

        Ok(())
    }
}
