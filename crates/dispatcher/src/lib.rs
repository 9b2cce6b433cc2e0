//! 出行调度与司机活跃度监控
//!
//! 包含优先级计算、队列排名、等待时间估算、请求匹配、紧急通道、活跃度监控、
//! 年度年级转换和管理员移交，以及驱动匹配的触发总线与工作线程池。

pub mod activity_monitor;
pub mod alerts;
pub mod emergency;
pub mod eta;
pub mod matcher;
pub mod priority;
pub mod queries;
pub mod queue;
pub mod request_service;
pub mod role_transfer;
pub mod transition;
pub mod trigger;
pub mod wait_time;

pub use activity_monitor::{ActivityMonitor, ActivityPoller, ActivityThresholds, ToggleOutcome};
pub use alerts::AlertPublisher;
pub use emergency::EmergencyOverride;
pub use eta::EtaResolver;
pub use matcher::{BindAttempt, BindOutcome, BindPlan, Binding, DispatchMatcher};
pub use queue::QueuedRequest;
pub use request_service::{QueuePosition, RequestService};
pub use role_transfer::RoleTransferCoordinator;
pub use transition::MembershipTransitionBatcher;
pub use trigger::{DispatchWorkerPool, TriggerQueue, TriggerReceiver, TriggerRouter};
