use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use saferide_api::create_app;
use saferide_config::AppConfig;
use saferide_dispatcher::{
    ActivityPoller, DispatchWorkerPool, EtaResolver, RequestService, TriggerQueue, TriggerRouter,
};
use saferide_domain::ports::{Clock, NotificationService, RoutingService};
use saferide_domain::store::DocumentStore;
use saferide_domain::{RoleTransferLog, TransitionLog};
use saferide_infrastructure::{
    describe_dispatch_metrics, init_metrics, HttpRoutingService, InMemoryDocumentStore,
    LoggingNotifier, SqliteDocumentStore, SystemClock,
};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{error, info};

use crate::shutdown::drain_tasks;

/// 关闭时等待后台任务退出的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// 主应用程序
pub struct Application {
    config: AppConfig,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    service: Arc<RequestService>,
}

impl Application {
    /// 按配置创建存储与协作方
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = create_store(&config).await?;
        let routing = create_routing(&config);
        Ok(Self::from_parts(
            config,
            store,
            Arc::new(SystemClock),
            Arc::new(LoggingNotifier),
            routing,
        ))
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationService>,
        routing: Option<Arc<dyn RoutingService>>,
    ) -> Self {
        let eta = EtaResolver::from_config(routing, &config.external);
        let service = Arc::new(RequestService::new(
            store.clone(),
            clock.clone(),
            notifier,
            eta,
            &config,
        ));
        Self {
            config,
            store,
            clock,
            service,
        }
    }

    pub fn service(&self) -> Arc<RequestService> {
        self.service.clone()
    }

    /// 运行调度总线、活跃度轮询和API服务，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if self.config.observability.metrics_enabled {
            init_metrics(&self.config.observability.metrics_bind_address)?;
            describe_dispatch_metrics();
        }

        let mut handles = Vec::new();
        if self.config.dispatcher.enabled {
            handles.extend(self.start_dispatcher(shutdown_rx.resubscribe()).await?);
        } else {
            info!("调度已在配置中禁用，只提供查询与写入接口");
        }
        handles.push(self.start_activity_poller(shutdown_rx.resubscribe()));
        if self.config.api.enabled {
            handles.push(self.start_api(shutdown_rx.resubscribe()).await?);
        }

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号，等待 {} 个后台任务退出", handles.len());
        drain_tasks(handles, SHUTDOWN_GRACE).await;
        Ok(())
    }

    async fn start_dispatcher(
        &self,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let dispatcher = &self.config.dispatcher;
        let (queue, receiver) = TriggerQueue::channel(dispatcher.trigger_queue_capacity);
        let router = TriggerRouter::new(self.store.clone(), self.clock.clone(), queue);

        // 启动前已有的排队请求
        let groups = router
            .trigger_all_groups()
            .await
            .context("补发启动调度信号失败")?;
        info!("启动调度总线: {} 个worker，补发 {} 个分组", dispatcher.worker_count, groups);

        let pool = DispatchWorkerPool::new(self.service.matcher(), receiver, dispatcher.worker_count);
        let router_rx = shutdown_rx.resubscribe();
        let mut handles = pool.spawn(shutdown_rx);
        handles.push(tokio::spawn(router.run(router_rx)));
        Ok(handles)
    }

    fn start_activity_poller(&self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.monitor.poll_interval_seconds);
        let poller = ActivityPoller::new(self.service.monitor(), interval);
        tokio::spawn(async move { poller.run(shutdown_rx).await })
    }

    async fn start_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let app = create_app(self.service.clone(), &self.config.api);
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        Ok(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            };
            if let Err(e) = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("API服务器运行失败: {}", e);
            }
        }))
    }

    pub async fn run_transition(&self, group_id: &str) -> Result<TransitionLog> {
        self.service
            .execute_annual_transition(group_id)
            .await
            .with_context(|| format!("分组 {group_id} 年级转换失败"))
    }

    pub async fn run_role_transfer(
        &self,
        group_id: &str,
        from_id: &str,
        to_id: &str,
    ) -> Result<RoleTransferLog> {
        self.service
            .transfer_admin_role(from_id, to_id, group_id)
            .await
            .with_context(|| format!("分组 {group_id} 管理员移交失败"))
    }
}

async fn create_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    let database = &config.database;
    if database.is_in_memory() {
        info!("使用进程内文档存储，重启后数据不保留");
        return Ok(Arc::new(InMemoryDocumentStore::new(database.max_batch_ops)));
    }

    let store = SqliteDocumentStore::connect(
        &database.url,
        database.max_connections,
        Duration::from_secs(database.connection_timeout_seconds),
        database.max_batch_ops,
    )
    .await
    .with_context(|| format!("连接数据库失败: {}", database.url))?;
    Ok(Arc::new(store))
}

fn create_routing(config: &AppConfig) -> Option<Arc<dyn RoutingService>> {
    let url = config.external.routing_url.as_deref()?;
    info!("路径规划服务: {}", url);
    let timeout = Duration::from_millis(config.external.request_timeout_ms);
    Some(Arc::new(HttpRoutingService::new(url, timeout)))
}
