use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use saferide_domain::ports::Clock;
use saferide_domain::store::{DocumentStore, WriteBatch};
use saferide_domain::{Role, RoleTransferLog, RoleTransferStatus};
use saferide_errors::{DispatchError, DispatchResult};

use crate::queries;

/// 管理员角色移交
///
/// 所有校验在写入前完成；降级、升级与日志在同一事务中提交。冲突不自动重试，由调用方决定。
pub struct RoleTransferCoordinator {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl RoleTransferCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self))]
    pub async fn transfer_role(
        &self,
        from_id: &str,
        to_id: &str,
        group_id: &str,
    ) -> DispatchResult<RoleTransferLog> {
        if from_id == to_id {
            return Err(DispatchError::validation("不能将管理员角色移交给自己"));
        }

        let from = queries::fetch_member(self.store.as_ref(), from_id).await?;
        let to = queries::fetch_member(self.store.as_ref(), to_id).await?;
        for member in [&from.value, &to.value] {
            if member.group_id != group_id {
                return Err(DispatchError::validation(format!(
                    "成员 {} 不属于分组 {}",
                    member.id, group_id
                )));
            }
        }
        if !from.value.is_admin() {
            return Err(DispatchError::validation(format!(
                "成员 {from_id} 不是分组 {group_id} 的当前管理员"
            )));
        }
        if to.value.is_admin() {
            warn!("成员 {} 已经是管理员，移交后分组将只保留一名管理员", to_id);
        }

        let now = self.clock.now();
        let mut demoted = from.value.clone();
        demoted.role = Role::Member;
        let mut promoted = to.value.clone();
        promoted.role = Role::Admin;
        let log = RoleTransferLog {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            from_member_id: from_id.to_string(),
            to_member_id: to_id.to_string(),
            status: RoleTransferStatus::Completed,
            transferred_at: now,
        };

        let mut batch = WriteBatch::new();
        batch.update(&demoted, from.version)?;
        batch.update(&promoted, to.version)?;
        batch.insert(&log)?;
        self.store.commit(batch).await?;

        info!("分组 {} 管理员角色已由 {} 移交给 {}", group_id, from_id, to_id);
        Ok(log)
    }
}
