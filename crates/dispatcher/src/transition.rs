use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use metrics::counter;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use saferide_config::MembershipConfig;
use saferide_domain::ports::Clock;
use saferide_domain::store::{DocumentStore, DocumentStoreExt, Versioned, WriteBatch};
use saferide_domain::{AlertRecord, AlertType, Member, TransitionLog, TransitionStatus};
use saferide_errors::{DispatchError, DispatchResult};

use crate::alerts::AlertPublisher;
use crate::queries;

const FINALIZE_ATTEMPTS: u32 = 3;

/// 年度转换中对单个成员的处理
#[derive(Debug, Clone)]
enum MemberChange {
    /// 已达最高年级，移出分组
    Remove(Versioned<Member>),
    Advance(Versioned<Member>),
}

impl MemberChange {
    fn stage(&self, batch: &mut WriteBatch) -> DispatchResult<()> {
        match self {
            MemberChange::Remove(member) => {
                batch.delete::<Member>(&member.value.id, member.version);
            }
            MemberChange::Advance(member) => {
                let mut advanced = member.value.clone();
                advanced.tier += 1;
                batch.update(&advanced, member.version)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ChunkTally {
    removed: u32,
    advanced: u32,
    total: u32,
    failed: u32,
    errors: Vec<String>,
}

impl ChunkTally {
    fn status(&self) -> TransitionStatus {
        match (self.failed, self.total) {
            (0, _) => TransitionStatus::Success,
            (failed, total) if failed == total => TransitionStatus::Failed,
            _ => TransitionStatus::Partial,
        }
    }

    fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

/// 年度年级转换
///
/// 成员写入按存储的单批上限分块提交，单块失败不回滚已提交的块，结果记录在转换日志中。
/// 每个分组每个周期只有一条记录；记录为成功、部分成功或执行中时拒绝再次执行。
pub struct MembershipTransitionBatcher {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    alerts: Arc<AlertPublisher>,
    max_tier: u32,
    chunk_size: usize,
}

impl MembershipTransitionBatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        alerts: Arc<AlertPublisher>,
        config: &MembershipConfig,
    ) -> Self {
        Self {
            store,
            clock,
            alerts,
            max_tier: config.max_tier,
            chunk_size: config.transition_chunk_size.max(1),
        }
    }

    fn effective_chunk_size(&self) -> usize {
        self.chunk_size.min(self.store.max_batch_ops()).max(1)
    }

    /// 本周期的转换记录，不论状态
    pub async fn log_for_cycle(
        &self,
        group_id: &str,
        cycle: i32,
    ) -> DispatchResult<Option<Versioned<TransitionLog>>> {
        self.store
            .fetch::<TransitionLog>(&TransitionLog::cycle_id(group_id, cycle))
            .await
    }

    /// 在触碰任何成员之前写入本周期的占位记录
    ///
    /// 只有没有记录或上次整体失败时才能占位；并发的两次执行只有一次提交成功。
    async fn claim_cycle(
        &self,
        group_id: &str,
        cycle: i32,
        started: DateTime<Utc>,
    ) -> DispatchResult<TransitionLog> {
        let guard = TransitionLog::in_progress(group_id, cycle, started);
        let mut batch = WriteBatch::new();
        match self.log_for_cycle(group_id, cycle).await? {
            None => {
                batch.insert(&guard)?;
            }
            Some(previous) if previous.value.status == TransitionStatus::Failed => {
                // 失败记录另存一份，周期记录重新占位
                let archived = TransitionLog {
                    id: format!("{}-{}", previous.value.id, Uuid::new_v4()),
                    ..previous.value.clone()
                };
                info!(
                    "分组 {} 在 {} 周期的上次转换失败 (另存为 {})，重新执行",
                    group_id, cycle, archived.id
                );
                batch.insert(&archived)?;
                batch.update(&guard, previous.version)?;
            }
            Some(previous) => {
                warn!(
                    "分组 {} 在 {} 周期已有转换记录 {} (状态: {:?})",
                    group_id, cycle, previous.value.id, previous.value.status
                );
                return Err(DispatchError::validation(match previous.value.status {
                    TransitionStatus::InProgress => format!(
                        "分组 {group_id} 本年度的年级转换正在执行或已中断，需人工核对记录 {}",
                        previous.value.id
                    ),
                    _ => format!("分组 {group_id} 本年度已完成年级转换"),
                }));
            }
        }

        match self.store.commit(batch).await {
            Ok(()) => Ok(guard),
            Err(e) if e.is_conflict() => Err(DispatchError::validation(format!(
                "分组 {group_id} 本年度的年级转换正在由其他调用执行"
            ))),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn execute_annual_transition(&self, group_id: &str) -> DispatchResult<TransitionLog> {
        let started = self.clock.now();
        let cycle = started.year();
        let guard = self.claim_cycle(group_id, cycle, started).await?;

        let members = match queries::group_members(self.store.as_ref(), group_id).await {
            Ok(members) => members,
            Err(e) => {
                error!("读取分组 {} 成员失败，年级转换未执行: {}", group_id, e);
                let failed = TransitionLog {
                    status: TransitionStatus::Failed,
                    error_summary: Some(format!("读取成员失败: {e}")),
                    executed_at: self.clock.now(),
                    ..guard
                };
                if let Err(log_err) = self.finalize(&failed).await {
                    error!("转换记录 {} 未能标记为失败: {}", failed.id, log_err);
                }
                return Err(e);
            }
        };
        info!("开始分组 {} 的年级转换，共 {} 名成员", group_id, members.len());

        let changes: Vec<MemberChange> = members
            .into_iter()
            .map(|m| {
                if m.value.tier >= self.max_tier {
                    MemberChange::Remove(m)
                } else {
                    MemberChange::Advance(m)
                }
            })
            .collect();

        let mut tally = ChunkTally::default();
        for (index, chunk) in changes.chunks(self.effective_chunk_size()).enumerate() {
            tally.total += 1;
            match self.commit_chunk(chunk).await {
                Ok(()) => {
                    for change in chunk {
                        match change {
                            MemberChange::Remove(_) => tally.removed += 1,
                            MemberChange::Advance(_) => tally.advanced += 1,
                        }
                    }
                }
                Err(e) => {
                    counter!("transition_chunks_failed_total").increment(1);
                    error!("分组 {} 年级转换第 {} 块提交失败: {}", group_id, index + 1, e);
                    tally.failed += 1;
                    tally.errors.push(format!("第 {} 块: {}", index + 1, e));
                }
            }
        }

        let log = TransitionLog {
            seniors_removed: tally.removed,
            users_advanced: tally.advanced,
            chunks_total: tally.total,
            chunks_failed: tally.failed,
            status: tally.status(),
            error_summary: tally.error_summary(),
            executed_at: self.clock.now(),
            ..guard
        };
        if let Err(e) = self.finalize(&log).await {
            error!(
                "分组 {} 成员已更新 (移出 {}，升级 {})，但转换记录 {} 写入失败，保持执行中状态: {}",
                group_id, log.seniors_removed, log.users_advanced, log.id, e
            );
            return Err(e);
        }
        self.publish_notice(&log).await;

        match log.status {
            TransitionStatus::Success => info!(
                "分组 {} 年级转换成功: 移出 {}，升级 {}",
                group_id, log.seniors_removed, log.users_advanced
            ),
            status => warn!(
                "分组 {} 年级转换结束，状态 {:?}，失败 {}/{} 块，需要人工跟进",
                group_id, status, log.chunks_failed, log.chunks_total
            ),
        }
        Ok(log)
    }

    /// 把占位记录改为最终状态，有限次重试
    async fn finalize(&self, log: &TransitionLog) -> DispatchResult<()> {
        let mut attempt = 1;
        loop {
            match self.try_finalize(log).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= FINALIZE_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(
                        "写入转换记录 {} 失败 (第 {}/{} 次): {}",
                        log.id, attempt, FINALIZE_ATTEMPTS, e
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_finalize(&self, log: &TransitionLog) -> DispatchResult<()> {
        let current = self
            .store
            .fetch::<TransitionLog>(&log.id)
            .await?
            .ok_or_else(|| DispatchError::not_found("转换记录", log.id.clone()))?;
        if current.value == *log {
            return Ok(());
        }
        if current.value.status != TransitionStatus::InProgress {
            return Err(DispatchError::conflict(format!(
                "转换记录 {} 已被修改为 {:?}",
                log.id, current.value.status
            )));
        }
        let mut batch = WriteBatch::new();
        batch.update(log, current.version)?;
        self.store.commit(batch).await
    }

    /// 记录已落盘后通知管理员，失败只记日志
    async fn publish_notice(&self, log: &TransitionLog) {
        let recipients = match self.alerts.recipients(&log.group_id).await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!("查询分组 {} 管理员失败，跳过转换通知: {}", log.group_id, e);
                return;
            }
        };
        let alert = AlertRecord::new(
            log.group_id.clone(),
            AlertType::TransitionNotice,
            format!(
                "{} 年度年级转换完成: 移出 {} 人，升级 {} 人，失败 {}/{} 块",
                log.cycle, log.seniors_removed, log.users_advanced, log.chunks_failed, log.chunks_total
            ),
            log.executed_at,
        )
        .with_recipients(recipients);

        if let Err(e) = self.store_notice(&alert).await {
            warn!("转换通知 {} 写入失败: {}", alert.id, e);
            return;
        }
        self.alerts.deliver(std::slice::from_ref(&alert)).await;
    }

    async fn store_notice(&self, alert: &AlertRecord) -> DispatchResult<()> {
        let mut batch = WriteBatch::new();
        batch.insert(alert)?;
        self.store.commit(batch).await
    }

    async fn commit_chunk(&self, chunk: &[MemberChange]) -> DispatchResult<()> {
        let mut batch = WriteBatch::new();
        for change in chunk {
            change.stage(&mut batch)?;
        }
        self.store.commit(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_chunk_tally() {
        let mut tally = ChunkTally::default();
        assert_eq!(tally.status(), TransitionStatus::Success);

        tally.total = 3;
        tally.failed = 1;
        assert_eq!(tally.status(), TransitionStatus::Partial);

        tally.failed = 3;
        assert_eq!(tally.status(), TransitionStatus::Failed);
    }

    #[test]
    fn test_error_summary_joins_chunk_errors() {
        let mut tally = ChunkTally::default();
        assert!(tally.error_summary().is_none());
        tally.errors.push("a".to_string());
        tally.errors.push("b".to_string());
        assert_eq!(tally.error_summary().as_deref(), Some("a; b"));
    }
}
