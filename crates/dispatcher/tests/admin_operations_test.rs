mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use common::{Harness, GROUP};
use saferide_config::MembershipConfig;
use saferide_dispatcher::{AlertPublisher, MembershipTransitionBatcher};
use saferide_domain::events::ChangeEvent;
use saferide_domain::store::{
    Collection, DocumentStore, DocumentStoreExt, Query, StoredDocument, WriteBatch, WriteOp,
};
use saferide_domain::{
    AlertType, DispatchError, DispatchResult, Member, Role, RoleTransferLog, TransitionLog,
    TransitionStatus,
};
use saferide_infrastructure::InMemoryDocumentStore;
use saferide_testing_utils::{seed, FakeClock, MemberBuilder, RecordingNotifier};

fn member(id: &str, tier: u32) -> Member {
    MemberBuilder::new().with_id(id).with_group(GROUP).with_tier(tier).build()
}

/// 对包含指定文档的批次注入提交失败
struct FlakyStore {
    inner: InMemoryDocumentStore,
    poisoned: Mutex<HashSet<String>>,
    poison_all_members: Mutex<bool>,
    poisoned_collections: Mutex<HashSet<Collection>>,
    /// 只拒绝写入最终状态的转换记录，执行中占位照常写入
    poison_finished_logs: Mutex<bool>,
    fail_member_queries: Mutex<bool>,
}

impl FlakyStore {
    fn new(inner: InMemoryDocumentStore) -> Self {
        Self {
            inner,
            poisoned: Mutex::new(HashSet::new()),
            poison_all_members: Mutex::new(false),
            poisoned_collections: Mutex::new(HashSet::new()),
            poison_finished_logs: Mutex::new(false),
            fail_member_queries: Mutex::new(false),
        }
    }

    fn poison_collection(&self, collection: Collection, enabled: bool) {
        let mut poisoned = self.poisoned_collections.lock().unwrap();
        if enabled {
            poisoned.insert(collection);
        } else {
            poisoned.remove(&collection);
        }
    }

    fn set_poison_finished_logs(&self, enabled: bool) {
        *self.poison_finished_logs.lock().unwrap() = enabled;
    }

    fn set_fail_member_queries(&self, enabled: bool) {
        *self.fail_member_queries.lock().unwrap() = enabled;
    }

    fn poison(&self, id: &str) {
        self.poisoned.lock().unwrap().insert(id.to_string());
    }

    fn set_poison_all_members(&self, enabled: bool) {
        *self.poison_all_members.lock().unwrap() = enabled;
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: Collection, id: &str) -> DispatchResult<Option<StoredDocument>> {
        self.inner.get(collection, id).await
    }

    async fn query(&self, collection: Collection, query: &Query) -> DispatchResult<Vec<StoredDocument>> {
        if collection == Collection::Members && *self.fail_member_queries.lock().unwrap() {
            return Err(DispatchError::Database("injected read failure".to_string()));
        }
        self.inner.query(collection, query).await
    }

    async fn commit(&self, batch: WriteBatch) -> DispatchResult<()> {
        let failing = {
            let poisoned = self.poisoned.lock().unwrap();
            let all_members = *self.poison_all_members.lock().unwrap();
            let collections = self.poisoned_collections.lock().unwrap();
            let finished_logs = *self.poison_finished_logs.lock().unwrap();
            batch.ops().iter().any(|op| {
                poisoned.contains(op.id())
                    || (all_members && op.collection() == Collection::Members)
                    || collections.contains(&op.collection())
                    || (finished_logs && is_finished_log(op))
            })
        };
        if failing {
            return Err(DispatchError::Database("injected write failure".to_string()));
        }
        self.inner.commit(batch).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.subscribe()
    }

    fn max_batch_ops(&self) -> usize {
        self.inner.max_batch_ops()
    }
}

fn is_finished_log(op: &WriteOp) -> bool {
    match op {
        WriteOp::Put {
            collection: Collection::TransitionLogs,
            data,
            ..
        } => data["status"] != "IN_PROGRESS",
        _ => false,
    }
}

fn batcher_over(store: Arc<FlakyStore>, chunk_size: usize) -> (MembershipTransitionBatcher, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::new());
    let alerts = Arc::new(AlertPublisher::new(store.clone(), notifier.clone()));
    let config = MembershipConfig {
        max_tier: 4,
        transition_chunk_size: chunk_size,
    };
    let batcher = MembershipTransitionBatcher::new(
        store,
        Arc::new(FakeClock::at_default_start()),
        alerts,
        &config,
    );
    (batcher, notifier)
}

async fn tiers(store: &dyn DocumentStore) -> Vec<u32> {
    let mut tiers: Vec<u32> = store
        .find::<Member>(&Query::new())
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.value.tier)
        .collect();
    tiers.sort_unstable();
    tiers
}

#[tokio::test]
async fn test_annual_transition_removes_seniors_and_advances_others() {
    let h = Harness::new();
    let mut members = vec![member("a", 4), member("b", 4), member("c", 3), member("d", 2), member("e", 1)];
    members[2].role = Role::Admin;
    h.seed_members(&members).await;

    let log = h.service.execute_annual_transition(GROUP).await.unwrap();
    assert_eq!(log.seniors_removed, 2);
    assert_eq!(log.users_advanced, 3);
    assert_eq!(log.status, TransitionStatus::Success);
    assert_eq!(log.chunks_failed, 0);
    assert_eq!(log.cycle, 2026);
    assert!(log.error_summary.is_none());

    assert_eq!(tiers(h.store.as_ref()).await, vec![2, 3, 4]);
    assert!(h.member("a").await.is_none());
    assert_eq!(h.member("c").await.unwrap().value.tier, 4);

    let stored = h.store.fetch::<TransitionLog>(&log.id).await.unwrap().unwrap();
    assert_eq!(stored.value, log);

    let notices = h.notifier.delivered();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].alert_type, AlertType::TransitionNotice);
    assert_eq!(notices[0].recipient_ids, vec!["c".to_string()]);
}

#[tokio::test]
async fn test_transition_runs_once_per_cycle() {
    let h = Harness::new();
    h.seed_members(&[member("a", 4), member("b", 1)]).await;
    h.service.execute_annual_transition(GROUP).await.unwrap();

    let err = h.service.execute_annual_transition(GROUP).await.unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(tiers(h.store.as_ref()).await, vec![2]);
    assert_eq!(h.store.len(Collection::TransitionLogs).await, 1);
}

#[tokio::test]
async fn test_transition_on_empty_group() {
    let h = Harness::new();
    let log = h.service.execute_annual_transition("empty-group").await.unwrap();
    assert_eq!(log.status, TransitionStatus::Success);
    assert_eq!(log.seniors_removed, 0);
    assert_eq!(log.users_advanced, 0);
    assert_eq!(log.chunks_total, 0);
}

#[tokio::test]
async fn test_transition_respects_store_batch_cap() {
    let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::new(2)));
    for m in [member("a", 4), member("b", 4), member("c", 3), member("d", 2), member("e", 1)] {
        seed(store.as_ref(), &[m]).await.unwrap();
    }
    let (batcher, _) = batcher_over(store.clone(), 500);

    let log = batcher.execute_annual_transition(GROUP).await.unwrap();
    assert_eq!(log.chunks_total, 3);
    assert_eq!(log.status, TransitionStatus::Success);
    assert_eq!(tiers(store.as_ref()).await, vec![2, 3, 4]);
}

#[tokio::test]
async fn test_failed_chunk_yields_partial_log() {
    let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::default()));
    seed(
        store.as_ref(),
        &[member("a", 4), member("b", 4), member("c", 3), member("d", 2), member("e", 1)],
    )
    .await
    .unwrap();
    store.poison("d");
    let (batcher, _) = batcher_over(store.clone(), 1);

    let log = batcher.execute_annual_transition(GROUP).await.unwrap();
    assert_eq!(log.status, TransitionStatus::Partial);
    assert_eq!(log.chunks_total, 5);
    assert_eq!(log.chunks_failed, 1);
    assert_eq!(log.seniors_removed, 2);
    assert_eq!(log.users_advanced, 2);
    assert!(log.error_summary.is_some());

    let d = store.fetch::<Member>("d").await.unwrap().unwrap();
    assert_eq!(d.value.tier, 2);

    // 部分成功同样阻止本周期再次执行
    assert!(batcher.execute_annual_transition(GROUP).await.is_err());
}

#[tokio::test]
async fn test_fully_failed_run_can_be_retried() {
    let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::default()));
    seed(store.as_ref(), &[member("a", 4), member("b", 2)]).await.unwrap();
    store.set_poison_all_members(true);
    let (batcher, _) = batcher_over(store.clone(), 1);

    let failed = batcher.execute_annual_transition(GROUP).await.unwrap();
    assert_eq!(failed.status, TransitionStatus::Failed);
    assert_eq!(failed.chunks_failed, 2);
    assert_eq!(tiers(store.as_ref()).await, vec![2, 4]);

    store.set_poison_all_members(false);
    let retried = batcher.execute_annual_transition(GROUP).await.unwrap();
    assert_eq!(retried.status, TransitionStatus::Success);
    assert_eq!(tiers(store.as_ref()).await, vec![3]);
}

#[tokio::test]
async fn test_unwritable_log_blocks_rerun_in_same_cycle() {
    let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::default()));
    seed(store.as_ref(), &[member("a", 4), member("b", 2), member("c", 1)]).await.unwrap();
    store.set_poison_finished_logs(true);
    let (batcher, notifier) = batcher_over(store.clone(), 500);

    let err = batcher.execute_annual_transition(GROUP).await.unwrap_err();
    assert!(matches!(err, DispatchError::Database(_)));
    assert_eq!(tiers(store.as_ref()).await, vec![2, 3]);
    assert!(notifier.delivered().is_empty());

    let guard = batcher.log_for_cycle(GROUP, 2026).await.unwrap().unwrap();
    assert_eq!(guard.value.status, TransitionStatus::InProgress);

    // 成员已生效但记录未定稿，再次执行不能重复升级
    store.set_poison_finished_logs(false);
    let err = batcher.execute_annual_transition(GROUP).await.unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(tiers(store.as_ref()).await, vec![2, 3]);
}

#[tokio::test]
async fn test_rejected_claim_leaves_members_untouched() {
    let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::default()));
    seed(store.as_ref(), &[member("a", 4), member("b", 2), member("c", 1)]).await.unwrap();
    store.poison_collection(Collection::TransitionLogs, true);
    let (batcher, _) = batcher_over(store.clone(), 500);

    assert!(batcher.execute_annual_transition(GROUP).await.is_err());
    assert_eq!(tiers(store.as_ref()).await, vec![1, 2, 4]);

    store.poison_collection(Collection::TransitionLogs, false);
    let log = batcher.execute_annual_transition(GROUP).await.unwrap();
    assert_eq!(log.status, TransitionStatus::Success);
    assert_eq!(tiers(store.as_ref()).await, vec![2, 3]);
    assert!(batcher.execute_annual_transition(GROUP).await.is_err());
    assert_eq!(tiers(store.as_ref()).await, vec![2, 3]);
}

#[tokio::test]
async fn test_member_read_failure_is_logged_as_failed() {
    let store = Arc::new(FlakyStore::new(InMemoryDocumentStore::default()));
    seed(store.as_ref(), &[member("a", 4), member("b", 2)]).await.unwrap();
    store.set_fail_member_queries(true);
    let (batcher, _) = batcher_over(store.clone(), 500);

    let err = batcher.execute_annual_transition(GROUP).await.unwrap_err();
    assert!(matches!(err, DispatchError::Database(_)));
    let failed = batcher.log_for_cycle(GROUP, 2026).await.unwrap().unwrap().value;
    assert_eq!(failed.status, TransitionStatus::Failed);
    assert_eq!(failed.users_advanced, 0);
    assert!(failed.error_summary.unwrap().contains("injected read failure"));

    store.set_fail_member_queries(false);
    let log = batcher.execute_annual_transition(GROUP).await.unwrap();
    assert_eq!(log.status, TransitionStatus::Success);
    assert_eq!(log.id, failed.id);
    assert_eq!(tiers(store.as_ref()).await, vec![3]);
}

#[tokio::test]
async fn test_transfer_to_self_is_rejected_without_writes() {
    let h = Harness::new();
    h.seed_admin("admin").await;
    let mut changes = h.store.subscribe();

    let err = h
        .service
        .transfer_admin_role("admin", "admin", GROUP)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert!(changes.try_recv().is_err());
    assert_eq!(h.member("admin").await.unwrap().version, 1);
    assert_eq!(h.store.len(Collection::RoleTransferLogs).await, 0);
}

#[tokio::test]
async fn test_transfer_validation() {
    let h = Harness::new();
    h.seed_admin("admin").await;
    h.seed_members(&[
        member("next", 3),
        member("other", 2),
        MemberBuilder::new().with_id("outsider").with_group("group-2").build(),
    ])
    .await;

    let err = h.service.transfer_admin_role("admin", "ghost", GROUP).await.unwrap_err();
    assert!(err.is_not_found());

    let err = h.service.transfer_admin_role("admin", "outsider", GROUP).await.unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    let err = h.service.transfer_admin_role("other", "next", GROUP).await.unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    assert_eq!(h.member("admin").await.unwrap().value.role, Role::Admin);
    assert_eq!(h.member("next").await.unwrap().value.role, Role::Member);
}

#[tokio::test]
async fn test_transfer_swaps_roles_and_logs() {
    let h = Harness::new();
    h.seed_admin("admin").await;
    h.seed_members(&[member("next", 3)]).await;

    let log = h.service.transfer_admin_role("admin", "next", GROUP).await.unwrap();
    assert_eq!(log.from_member_id, "admin");
    assert_eq!(log.to_member_id, "next");

    assert_eq!(h.member("admin").await.unwrap().value.role, Role::Member);
    assert_eq!(h.member("next").await.unwrap().value.role, Role::Admin);
    let stored = h.store.fetch::<RoleTransferLog>(&log.id).await.unwrap().unwrap();
    assert_eq!(stored.value, log);
}
