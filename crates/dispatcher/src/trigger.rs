use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use saferide_domain::events::{ChangeEvent, ChangeKind, DispatchTrigger, TriggerReason};
use saferide_domain::ports::Clock;
use saferide_domain::store::{Collection, DocumentStore};
use saferide_domain::RequestStatus;
use saferide_errors::{DispatchError, DispatchResult};

use crate::matcher::DispatchMatcher;
use crate::queries;

/// 有界调度工作队列
///
/// 同一分组在被消费前只保留一个待处理信号，消费时先清除标记，
/// 匹配进行中产生的新变更会重新入队。
#[derive(Clone)]
pub struct TriggerQueue {
    sender: mpsc::Sender<DispatchTrigger>,
    pending: Arc<Mutex<HashSet<String>>>,
}

/// 工作队列的消费端，可由多个工作线程共享
#[derive(Clone)]
pub struct TriggerReceiver {
    receiver: Arc<Mutex<mpsc::Receiver<DispatchTrigger>>>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl TriggerQueue {
    pub fn channel(capacity: usize) -> (TriggerQueue, TriggerReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Mutex::new(HashSet::new()));
        (
            TriggerQueue {
                sender,
                pending: pending.clone(),
            },
            TriggerReceiver {
                receiver: Arc::new(Mutex::new(receiver)),
                pending,
            },
        )
    }

    /// 入队，分组已有待处理信号时返回 `false`
    pub async fn push(&self, trigger: DispatchTrigger) -> DispatchResult<bool> {
        {
            let mut pending = self.pending.lock().await;
            if !pending.insert(trigger.group_id.clone()) {
                debug!(
                    "分组 {} 已有待处理的调度信号，合并 {}",
                    trigger.group_id,
                    trigger.reason.as_str()
                );
                return Ok(false);
            }
        }

        let group_id = trigger.group_id.clone();
        if self.sender.send(trigger).await.is_err() {
            self.pending.lock().await.remove(&group_id);
            return Err(DispatchError::Internal("调度工作队列已关闭".to_string()));
        }
        Ok(true)
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl TriggerReceiver {
    /// 所有发送端关闭后返回 `None`
    pub async fn next(&self) -> Option<DispatchTrigger> {
        let trigger = self.receiver.lock().await.recv().await?;
        self.pending.lock().await.remove(&trigger.group_id);
        Some(trigger)
    }
}

/// 把存储变更映射为调度信号
///
/// 只有新建的 Open 请求和可接单司机的会话变化会触发匹配。
pub struct TriggerRouter {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    queue: TriggerQueue,
    events: broadcast::Receiver<ChangeEvent>,
}

impl TriggerRouter {
    /// 创建时立即订阅变更通知，之后的写入都不会遗漏
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, queue: TriggerQueue) -> Self {
        let events = store.subscribe();
        Self {
            store,
            clock,
            queue,
            events,
        }
    }

    pub fn map_event(event: &ChangeEvent) -> Option<TriggerReason> {
        let data = event.data.as_ref()?;
        match (event.collection, event.kind) {
            (Collection::Requests, ChangeKind::Created) => {
                let open = data.get("status")? == &serde_json::Value::from(RequestStatus::Open);
                open.then_some(TriggerReason::NewRequest)
            }
            (Collection::DriverSessions, ChangeKind::Created | ChangeKind::Updated) => {
                let available = data.get("available")?.as_bool()?;
                let open = data.get("ended_at").map_or(true, |v| v.is_null());
                (available && open).then_some(TriggerReason::DriverChanged)
            }
            _ => None,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("启动调度触发路由");
        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出调度触发路由");
                    break;
                }
                received = self.events.recv() => received,
            };

            match received {
                Ok(event) => self.route(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("变更通知滞后，丢失 {} 条事件，重新触发所有分组", skipped);
                    if let Err(e) = self.trigger_all_groups().await {
                        error!("重新触发分组匹配失败: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("存储变更通知已关闭，退出调度触发路由");
                    break;
                }
            }
        }
    }

    async fn route(&self, event: &ChangeEvent) {
        let (Some(reason), Some(group_id)) = (Self::map_event(event), event.group_id()) else {
            return;
        };
        let trigger = DispatchTrigger::new(group_id, reason, self.clock.now());
        if let Err(e) = self.queue.push(trigger).await {
            error!("调度信号入队失败: {}", e);
        }
    }

    /// 对所有存在排队请求或值班司机的分组补发一次信号
    pub async fn trigger_all_groups(&self) -> DispatchResult<usize> {
        let groups: BTreeSet<String> = queries::open_sessions(self.store.as_ref(), None)
            .await?
            .into_iter()
            .map(|s| s.value.group_id)
            .collect();
        let now = self.clock.now();
        for group_id in &groups {
            self.queue
                .push(DispatchTrigger::new(group_id.clone(), TriggerReason::Manual, now))
                .await?;
        }
        Ok(groups.len())
    }
}

/// 调度工作线程池，每个信号对所在分组执行一轮队列匹配
pub struct DispatchWorkerPool {
    matcher: Arc<DispatchMatcher>,
    receiver: TriggerReceiver,
    worker_count: usize,
}

impl DispatchWorkerPool {
    pub fn new(matcher: Arc<DispatchMatcher>, receiver: TriggerReceiver, worker_count: usize) -> Self {
        Self {
            matcher,
            receiver,
            worker_count: worker_count.max(1),
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> Vec<JoinHandle<()>> {
        info!("启动 {} 个调度工作线程", self.worker_count);
        (0..self.worker_count)
            .map(|index| {
                let matcher = self.matcher.clone();
                let receiver = self.receiver.clone();
                let shutdown = shutdown.resubscribe();
                tokio::spawn(run_worker(index, matcher, receiver, shutdown))
            })
            .collect()
    }
}

async fn run_worker(
    index: usize,
    matcher: Arc<DispatchMatcher>,
    receiver: TriggerReceiver,
    mut shutdown: broadcast::Receiver<()>,
) {
    debug!("调度工作线程 {} 已启动", index);
    loop {
        let trigger = tokio::select! {
            _ = shutdown.recv() => break,
            next = receiver.next() => match next {
                Some(trigger) => trigger,
                None => break,
            },
        };

        counter!("dispatch_triggers_total", "reason" => trigger.reason.as_str()).increment(1);
        debug!(
            "工作线程 {} 处理分组 {} 的调度信号 ({})",
            index,
            trigger.group_id,
            trigger.reason.as_str()
        );
        if let Err(e) = matcher.run_queue(&trigger.group_id).await {
            error!("分组 {} 队列匹配失败: {}", trigger.group_id, e);
        }
    }
    debug!("调度工作线程 {} 已退出", index);
}
