//! 文档存储抽象
//!
//! 系统唯一的共享状态是一个支持乐观并发控制的事务型文档存储。
//! 每个文档带有整数版本号，每次写入递增；提交时逐一校验前置条件，
//! 任一失败则整个批次不落盘。

use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::entities::{AlertRecord, DriverSession, Member, Request, RoleTransferLog, TransitionLog};
use crate::events::ChangeEvent;
use saferide_errors::{DispatchError, DispatchResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Collection {
    Requests,
    DriverSessions,
    Members,
    Alerts,
    TransitionLogs,
    RoleTransferLogs,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Requests => "requests",
            Collection::DriverSessions => "driver_sessions",
            Collection::Members => "members",
            Collection::Alerts => "alerts",
            Collection::TransitionLogs => "transition_logs",
            Collection::RoleTransferLogs => "role_transfer_logs",
        }
    }
}

/// 可持久化到文档存储的实体
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;
    fn document_id(&self) -> &str;
}

impl Document for Request {
    const COLLECTION: Collection = Collection::Requests;
    fn document_id(&self) -> &str {
        &self.id
    }
}

impl Document for DriverSession {
    const COLLECTION: Collection = Collection::DriverSessions;
    fn document_id(&self) -> &str {
        &self.session_id
    }
}

impl Document for Member {
    const COLLECTION: Collection = Collection::Members;
    fn document_id(&self) -> &str {
        &self.id
    }
}

impl Document for AlertRecord {
    const COLLECTION: Collection = Collection::Alerts;
    fn document_id(&self) -> &str {
        &self.id
    }
}

impl Document for TransitionLog {
    const COLLECTION: Collection = Collection::TransitionLogs;
    fn document_id(&self) -> &str {
        &self.id
    }
}

impl Document for RoleTransferLog {
    const COLLECTION: Collection = Collection::RoleTransferLogs;
    fn document_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> DispatchResult<Versioned<T>> {
        let value = serde_json::from_value(self.data.clone())?;
        Ok(Versioned {
            version: self.version,
            value,
        })
    }
}

/// 带读取时版本号的实体，写回时作为前置条件
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// 支持 `pickup.address` 形式的嵌套字段
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    fn new(field: &str, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op,
            value,
        }
    }
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value.into())
    }
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Ne, value.into())
    }
    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lt, value.into())
    }
    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lte, value.into())
    }
    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gt, value.into())
    }
    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gte, value.into())
    }
    pub fn is_in<V: Into<Value>>(field: &str, values: Vec<V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Self::new(field, FilterOp::In, Value::Array(values))
    }
    pub fn is_null(field: &str) -> Self {
        Self::new(field, FilterOp::Eq, Value::Null)
    }

    pub fn matches(&self, data: &Value) -> bool {
        let actual = lookup(data, &self.field);
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::In => match &self.value {
                Value::Array(candidates) => candidates.iter().any(|c| c == actual),
                _ => false,
            },
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

static NULL: Value = Value::Null;

fn lookup<'a>(data: &'a Value, field: &str) -> &'a Value {
    field
        .split('.')
        .try_fold(data, |current, key| current.get(key))
        .unwrap_or(&NULL)
}

/// 数字按数值比较；两侧都是RFC3339时间时按时间比较，否则按字符串比较
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => Some(x.with_timezone(&Utc).cmp(&y.with_timezone(&Utc))),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(data))
    }

    /// 过滤、排序并截断，所有存储实现共用
    pub fn apply(&self, documents: impl IntoIterator<Item = StoredDocument>) -> Vec<StoredDocument> {
        let mut matched: Vec<StoredDocument> = documents
            .into_iter()
            .filter(|doc| self.matches(&doc.data))
            .collect();

        if let Some((field, direction)) = &self.order_by {
            matched.sort_by(|a, b| {
                let ordering = compare_values(lookup(&a.data, field), lookup(&b.data, field))
                    .unwrap_or(Ordering::Equal);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    NotExists,
    Version(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        collection: Collection,
        id: String,
        data: Value,
        precondition: Precondition,
    },
    Delete {
        collection: Collection,
        id: String,
        precondition: Precondition,
    },
    /// 只校验前置条件，不写入
    Check {
        collection: Collection,
        id: String,
        precondition: Precondition,
    },
}

impl WriteOp {
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Put { collection, .. }
            | WriteOp::Delete { collection, .. }
            | WriteOp::Check { collection, .. } => *collection,
        }
    }
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Put { id, .. } | WriteOp::Delete { id, .. } | WriteOp::Check { id, .. } => id,
        }
    }
    pub fn precondition(&self) -> Precondition {
        match self {
            WriteOp::Put { precondition, .. }
            | WriteOp::Delete { precondition, .. }
            | WriteOp::Check { precondition, .. } => *precondition,
        }
    }
}

/// 一次原子提交包含的所有写操作
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn put<T: Document>(
        &mut self,
        document: &T,
        precondition: Precondition,
    ) -> DispatchResult<&mut Self> {
        self.ops.push(WriteOp::Put {
            collection: T::COLLECTION,
            id: document.document_id().to_string(),
            data: serde_json::to_value(document)?,
            precondition,
        });
        Ok(self)
    }
    pub fn insert<T: Document>(&mut self, document: &T) -> DispatchResult<&mut Self> {
        self.put(document, Precondition::NotExists)
    }
    pub fn update<T: Document>(&mut self, document: &T, version: u64) -> DispatchResult<&mut Self> {
        self.put(document, Precondition::Version(version))
    }
    pub fn delete<T: Document>(&mut self, id: &str, version: u64) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection: T::COLLECTION,
            id: id.to_string(),
            precondition: Precondition::Version(version),
        });
        self
    }
    /// 要求读取过的文档在提交时仍是该版本
    pub fn check<T: Document>(&mut self, id: &str, version: u64) -> &mut Self {
        self.ops.push(WriteOp::Check {
            collection: T::COLLECTION,
            id: id.to_string(),
            precondition: Precondition::Version(version),
        });
        self
    }
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
    pub fn len(&self) -> usize {
        self.ops.len()
    }
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// 提交前的结构校验：非空、不超过上限、同一文档不重复出现
    pub fn validate(&self, max_ops: usize) -> DispatchResult<()> {
        if self.ops.is_empty() {
            return Err(DispatchError::validation("写批次不能为空"));
        }
        if self.ops.len() > max_ops {
            return Err(DispatchError::validation(format!(
                "写批次包含 {} 个操作，超过单事务上限 {}",
                self.ops.len(),
                max_ops
            )));
        }
        let mut seen = HashSet::new();
        for op in &self.ops {
            if !seen.insert((op.collection(), op.id())) {
                return Err(DispatchError::validation(format!(
                    "同一批次中重复写入文档 {}/{}",
                    op.collection().as_str(),
                    op.id()
                )));
            }
        }
        Ok(())
    }
}

/// 前置条件校验，`current` 为存储中的当前版本
pub fn check_precondition(
    op: &WriteOp,
    current: Option<u64>,
) -> DispatchResult<()> {
    let ok = match (op.precondition(), current) {
        (Precondition::None, _) => true,
        (Precondition::NotExists, None) => true,
        (Precondition::NotExists, Some(_)) => false,
        (Precondition::Version(expected), Some(actual)) => expected == actual,
        (Precondition::Version(_), None) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(DispatchError::conflict(format!(
            "文档 {}/{} 前置条件 {:?} 不满足，当前版本: {:?}",
            op.collection().as_str(),
            op.id(),
            op.precondition(),
            current
        )))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> DispatchResult<Option<StoredDocument>>;

    async fn query(&self, collection: Collection, query: &Query)
        -> DispatchResult<Vec<StoredDocument>>;

    /// 原子提交；任一前置条件失败返回 `ConcurrencyConflict` 且不写入任何文档
    async fn commit(&self, batch: WriteBatch) -> DispatchResult<()>;

    /// 订阅提交成功后的变更通知
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    fn max_batch_ops(&self) -> usize;
}

/// 类型化读取
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    async fn fetch<T: Document>(&self, id: &str) -> DispatchResult<Option<Versioned<T>>> {
        match self.get(T::COLLECTION, id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    async fn find<T: Document>(&self, query: &Query) -> DispatchResult<Vec<Versioned<T>>> {
        self.query(T::COLLECTION, query)
            .await?
            .iter()
            .map(StoredDocument::decode)
            .collect()
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}
