use std::collections::HashMap;

use async_trait::async_trait;
use saferide_domain::events::{ChangeEvent, ChangeKind};
use saferide_domain::store::{
    check_precondition, Collection, DocumentStore, Query, StoredDocument, WriteBatch, WriteOp,
};
use saferide_errors::DispatchResult;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// 内存文档存储实现
///
/// 适用于嵌入式部署和测试场景。提交时持有写锁完成全部前置条件校验与写入，
/// 因此同一批次对其他读者要么全部可见要么全部不可见。
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<Collection, HashMap<String, (u64, Value)>>>,
    events: broadcast::Sender<ChangeEvent>,
    max_batch_ops: usize,
}

impl InMemoryDocumentStore {
    pub fn new(max_batch_ops: usize) -> Self {
        Self::with_event_capacity(max_batch_ops, 1024)
    }

    pub fn with_event_capacity(max_batch_ops: usize, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            collections: RwLock::new(HashMap::new()),
            events,
            max_batch_ops,
        }
    }

    pub async fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .await
            .get(&collection)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: Collection, id: &str) -> DispatchResult<Option<StoredDocument>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .map(|(version, data)| StoredDocument {
                id: id.to_string(),
                version: *version,
                data: data.clone(),
            }))
    }

    async fn query(
        &self,
        collection: Collection,
        query: &Query,
    ) -> DispatchResult<Vec<StoredDocument>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&collection) else {
            return Ok(Vec::new());
        };
        let mut candidates: Vec<StoredDocument> = docs
            .iter()
            .map(|(id, (version, data))| StoredDocument {
                id: id.clone(),
                version: *version,
                data: data.clone(),
            })
            .collect();
        // HashMap 迭代顺序不稳定，先按id排序保证未指定排序时结果确定
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(query.apply(candidates))
    }

    async fn commit(&self, batch: WriteBatch) -> DispatchResult<()> {
        batch.validate(self.max_batch_ops)?;

        let mut collections = self.collections.write().await;

        for op in batch.ops() {
            let current = collections
                .get(&op.collection())
                .and_then(|docs| docs.get(op.id()))
                .map(|(version, _)| *version);
            check_precondition(op, current)?;
        }

        let mut events = Vec::with_capacity(batch.len());
        for op in batch.into_ops() {
            match op {
                WriteOp::Put {
                    collection,
                    id,
                    data,
                    ..
                } => {
                    let docs = collections.entry(collection).or_default();
                    let (version, kind) = match docs.get(&id) {
                        Some((v, _)) => (v + 1, ChangeKind::Updated),
                        None => (1, ChangeKind::Created),
                    };
                    docs.insert(id.clone(), (version, data.clone()));
                    events.push(ChangeEvent {
                        collection,
                        id,
                        kind,
                        version,
                        data: Some(data),
                    });
                }
                WriteOp::Check { .. } => {}
                WriteOp::Delete { collection, id, .. } => {
                    if let Some((version, _)) = collections
                        .get_mut(&collection)
                        .and_then(|docs| docs.remove(&id))
                    {
                        events.push(ChangeEvent {
                            collection,
                            id,
                            kind: ChangeKind::Deleted,
                            version,
                            data: None,
                        });
                    }
                }
            }
        }
        drop(collections);

        debug!("内存存储提交成功，写入 {} 个文档", events.len());
        for event in events {
            // 没有订阅者时发送失败是正常情况
            let _ = self.events.send(event);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }
}
