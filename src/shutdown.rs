use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭后置为 None，之后的订阅者立即收到信号
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let shutdown_tx = self.shutdown_tx.read().await;
        if let Some(ref tx) = *shutdown_tx {
            tx.subscribe()
        } else {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            rx
        }
    }

    /// 触发关闭，重复调用无副作用
    pub async fn shutdown(&self) {
        let mut shutdown_tx = self.shutdown_tx.write().await;
        let Some(tx) = shutdown_tx.take() else {
            debug!("关闭管理器已经触发过关闭");
            return;
        };

        debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
        // 没有订阅者时发送失败，可以忽略
        let _ = tx.send(());
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        self.shutdown_tx.read().await.is_none()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 在总超时内等待后台任务退出，返回按时退出的任务数；超时的任务被中止
pub async fn drain_tasks(handles: Vec<JoinHandle<()>>, grace: Duration) -> usize {
    let total = handles.len();
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

    let joined = timeout(grace, async move {
        let mut finished = 0;
        for handle in handles {
            match handle.await {
                Ok(()) => finished += 1,
                Err(e) => warn!("后台任务异常退出: {}", e),
            }
        }
        finished
    })
    .await;

    match joined {
        Ok(finished) => {
            info!("{}/{} 个后台任务已退出", finished, total);
            finished
        }
        Err(_) => {
            warn!("等待后台任务退出超时 ({:?})，强制中止", grace);
            for abort in aborts {
                abort.abort();
            }
            0
        }
    }
}
