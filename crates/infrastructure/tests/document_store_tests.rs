use std::sync::Arc;
use std::time::Duration;

use saferide_domain::events::ChangeKind;
use saferide_domain::store::{
    Collection, DocumentStore, DocumentStoreExt, Filter, Precondition, Query, SortDirection,
    WriteBatch,
};
use saferide_domain::{DispatchError, Member, Request, RequestStatus};
use saferide_infrastructure::{InMemoryDocumentStore, SqliteDocumentStore};
use saferide_testing_utils::{seed, MemberBuilder, RequestBuilder};
use tempfile::TempDir;

async fn sqlite_store(dir: &TempDir, max_batch_ops: usize) -> SqliteDocumentStore {
    let url = format!("sqlite://{}", dir.path().join("saferide.db").display());
    SqliteDocumentStore::connect(&url, 4, Duration::from_secs(5), max_batch_ops)
        .await
        .expect("sqlite store should open")
}

async fn assert_versioned_writes(store: &dyn DocumentStore) {
    let member = MemberBuilder::new().with_id("m1").with_tier(2).build();
    seed(store, &[member.clone()]).await.unwrap();

    let stored = store.fetch::<Member>("m1").await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.value, member);

    let mut updated = stored.value.clone();
    updated.tier = 3;
    let mut batch = WriteBatch::new();
    batch.update(&updated, stored.version).unwrap();
    store.commit(batch).await.unwrap();

    let stored = store.fetch::<Member>("m1").await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.value.tier, 3);

    // 旧版本号写回必须失败
    let mut stale = WriteBatch::new();
    stale.update(&member, 1).unwrap();
    let err = store.commit(stale).await.unwrap_err();
    assert!(err.is_conflict());

    // 重复插入失败
    let mut duplicate = WriteBatch::new();
    duplicate.insert(&member).unwrap();
    assert!(store.commit(duplicate).await.unwrap_err().is_conflict());
}

async fn assert_batch_is_atomic(store: &dyn DocumentStore) {
    let a = MemberBuilder::new().with_id("a").build();
    let b = MemberBuilder::new().with_id("b").build();
    seed(store, &[a.clone()]).await.unwrap();

    let mut batch = WriteBatch::new();
    batch.insert(&b).unwrap();
    batch.update(&a, 42).unwrap();
    assert!(store.commit(batch).await.unwrap_err().is_conflict());

    assert!(store.fetch::<Member>("b").await.unwrap().is_none());
    assert_eq!(store.fetch::<Member>("a").await.unwrap().unwrap().version, 1);

    // 只读校验失败同样使整个批次失效
    let mut checked = WriteBatch::new();
    checked.insert(&b).unwrap();
    checked.check::<Member>("a", 7);
    assert!(store.commit(checked).await.unwrap_err().is_conflict());
    assert!(store.fetch::<Member>("b").await.unwrap().is_none());

    let mut checked = WriteBatch::new();
    checked.insert(&b).unwrap();
    checked.check::<Member>("a", 1);
    store.commit(checked).await.unwrap();
    assert_eq!(store.fetch::<Member>("a").await.unwrap().unwrap().version, 1);
    assert!(store.fetch::<Member>("b").await.unwrap().is_some());
}

async fn assert_query_filters(store: &dyn DocumentStore) {
    let base = chrono::Utc::now();
    let requests = vec![
        RequestBuilder::new()
            .with_id("r1")
            .with_priority(17.5)
            .with_requested_at(base)
            .build(),
        RequestBuilder::new()
            .with_id("r2")
            .with_priority(42.5)
            .with_requested_at(base)
            .build(),
        RequestBuilder::new()
            .with_id("r3")
            .with_group("group-2")
            .with_priority(99.0)
            .build(),
        RequestBuilder::new()
            .with_id("r4")
            .with_priority(30.0)
            .completed_by("d1")
            .build(),
    ];
    seed(store, &requests).await.unwrap();

    let query = Query::new()
        .filter(Filter::eq("group_id", "group-1"))
        .filter(Filter::is_in(
            "status",
            vec![RequestStatus::Open, RequestStatus::Bound, RequestStatus::EnRoute],
        ))
        .order_by("priority", SortDirection::Desc);
    let found = store.find::<Request>(&query).await.unwrap();
    let ids: Vec<&str> = found.iter().map(|r| r.value.id.as_str()).collect();
    assert_eq!(ids, vec!["r2", "r1"]);

    let limited = store
        .query(Collection::Requests, &Query::new().limit(2))
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}

async fn assert_change_events(store: &dyn DocumentStore) {
    let mut events = store.subscribe();
    let member = MemberBuilder::new().with_id("watched").build();
    seed(store, &[member.clone()]).await.unwrap();

    let mut batch = WriteBatch::new();
    batch.put(&member, Precondition::None).unwrap();
    store.commit(batch).await.unwrap();

    let mut delete = WriteBatch::new();
    delete.delete::<Member>("watched", 2);
    store.commit(delete).await.unwrap();

    let created = events.recv().await.unwrap();
    assert_eq!(created.kind, ChangeKind::Created);
    assert_eq!(created.collection, Collection::Members);
    assert_eq!(created.group_id(), Some("group-1"));
    let updated = events.recv().await.unwrap();
    assert_eq!(updated.kind, ChangeKind::Updated);
    assert_eq!(updated.version, 2);
    let deleted = events.recv().await.unwrap();
    assert_eq!(deleted.kind, ChangeKind::Deleted);
    assert!(deleted.data.is_none());
}

async fn assert_batch_cap(store: &dyn DocumentStore) {
    let members: Vec<Member> = (0..3)
        .map(|i| MemberBuilder::new().with_id(&format!("cap-{i}")).build())
        .collect();
    let err = seed(store, &members).await.unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(
        store
            .query(Collection::Members, &Query::new())
            .await
            .unwrap()
            .len(),
        0
    );
}

#[tokio::test]
async fn test_in_memory_store_contract() {
    assert_versioned_writes(&InMemoryDocumentStore::default()).await;
    assert_batch_is_atomic(&InMemoryDocumentStore::default()).await;
    assert_query_filters(&InMemoryDocumentStore::default()).await;
    assert_change_events(&InMemoryDocumentStore::default()).await;
    assert_batch_cap(&InMemoryDocumentStore::new(2)).await;
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let dir = TempDir::new().unwrap();
    assert_versioned_writes(&sqlite_store(&dir, 500).await).await;

    let dir = TempDir::new().unwrap();
    assert_batch_is_atomic(&sqlite_store(&dir, 500).await).await;

    let dir = TempDir::new().unwrap();
    assert_query_filters(&sqlite_store(&dir, 500).await).await;

    let dir = TempDir::new().unwrap();
    assert_change_events(&sqlite_store(&dir, 500).await).await;

    let dir = TempDir::new().unwrap();
    assert_batch_cap(&sqlite_store(&dir, 2).await).await;
}

fn mixed_requests(count: usize) -> Vec<Request> {
    let base = chrono::Utc::now();
    (0..count)
        .map(|i| {
            let builder = RequestBuilder::new()
                .with_id(&format!("req-{i:03}"))
                .with_group(if i % 3 == 0 { "group-2" } else { "group-1" })
                .with_requester(&format!("m{}", i % 7), (i % 4) as u32 + 1)
                .with_priority((i * 37 % 50) as f64 + 0.5)
                .with_requested_at(base + chrono::Duration::seconds((i % 11) as i64));
            let builder = match i % 5 {
                0 => builder.bound_to(&format!("d{}", i % 2)),
                1 => builder.completed_by("d1"),
                2 => builder.en_route_with("d0"),
                _ => builder,
            };
            builder.build()
        })
        .collect()
}

#[tokio::test]
async fn test_sqlite_queries_match_in_memory_results() {
    let requests = mixed_requests(120);
    let memory = InMemoryDocumentStore::default();
    let dir = TempDir::new().unwrap();
    let sqlite = sqlite_store(&dir, 500).await;
    seed(&memory, &requests).await.unwrap();
    seed(&sqlite, &requests).await.unwrap();

    let queued = vec![RequestStatus::Open, RequestStatus::Bound, RequestStatus::EnRoute];
    let queries = vec![
        Query::new()
            .filter(Filter::eq("group_id", "group-1"))
            .filter(Filter::is_in("status", queued.clone()))
            .order_by("priority", SortDirection::Desc)
            .limit(10),
        Query::new()
            .filter(Filter::eq("requester_id", "m3"))
            .filter(Filter::is_in("status", queued.clone()))
            .limit(1),
        Query::new()
            .filter(Filter::eq("driver_id", "d0"))
            .order_by("requested_at", SortDirection::Asc),
        Query::new().filter(Filter::is_null("driver_id")).limit(7),
        Query::new()
            .filter(Filter::gte("priority", 20))
            .filter(Filter::ne("status", "COMPLETED"))
            .limit(5),
        Query::new().order_by("priority", SortDirection::Asc).limit(15),
        Query::new().filter(Filter::is_in::<&str>("status", vec![])),
    ];

    for query in &queries {
        let expected = memory.query(Collection::Requests, query).await.unwrap();
        let actual = sqlite.query(Collection::Requests, query).await.unwrap();
        assert_eq!(actual, expected, "results differ for {query:?}");
    }
    assert!(!memory
        .query(Collection::Requests, &queries[0])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_sqlite_store_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = sqlite_store(&dir, 500).await;
        let member = MemberBuilder::new().with_id("durable").with_tier(4).build();
        seed(&store, &[member]).await.unwrap();
        store.close().await;
    }

    let store = sqlite_store(&dir, 500).await;
    let member = store.fetch::<Member>("durable").await.unwrap().unwrap();
    assert_eq!(member.value.tier, 4);
    store.health_check().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_conditional_writes_single_winner() {
    let store = Arc::new(InMemoryDocumentStore::default());
    let member = MemberBuilder::new().with_id("contended").build();
    seed(store.as_ref(), &[member.clone()]).await.unwrap();

    let mut handles = Vec::new();
    for tier in 1..=8u32 {
        let store = store.clone();
        let mut candidate = member.clone();
        candidate.tier = tier;
        handles.push(tokio::spawn(async move {
            let mut batch = WriteBatch::new();
            batch.update(&candidate, 1).unwrap();
            store.commit(batch).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.fetch::<Member>("contended").await.unwrap().unwrap().version, 2);
}
