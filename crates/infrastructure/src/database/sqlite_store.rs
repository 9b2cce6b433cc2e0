use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use saferide_domain::events::{ChangeEvent, ChangeKind};
use saferide_domain::store::{
    check_precondition, Collection, DocumentStore, Filter, FilterOp, Query, StoredDocument,
    WriteBatch, WriteOp,
};
use saferide_errors::{DispatchError, DispatchResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    version INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (collection, id)
)
"#;

/// 把查询中可精确表达的条件下推为 `json_extract` 条件
///
/// 只下推字符串等值、字符串集合与空值判断；其余条件与排序留给 `Query::apply`。
/// 全部条件都已下推且没有排序时才附加 `LIMIT`。
#[derive(Debug)]
struct SelectStatement {
    sql: String,
    args: Vec<String>,
}

impl SelectStatement {
    fn build(collection: Collection, query: &Query) -> Self {
        let mut select = Self {
            sql: "SELECT id, version, data FROM documents WHERE collection = $1".to_string(),
            args: vec![collection.as_str().to_string()],
        };

        let mut exact = true;
        for filter in &query.filters {
            exact &= select.push_filter(filter);
        }

        select.sql.push_str(" ORDER BY id");
        if let (Some(limit), true, None) = (query.limit, exact, &query.order_by) {
            select.sql.push_str(&format!(" LIMIT {limit}"));
        }
        select
    }

    fn bind(&mut self, value: impl Into<String>) -> String {
        self.args.push(value.into());
        format!("${}", self.args.len())
    }

    /// 返回该条件是否被完整下推
    fn push_filter(&mut self, filter: &Filter) -> bool {
        if !is_plain_path(&filter.field) {
            return false;
        }
        let path = format!("$.{}", filter.field);

        match (filter.op, &filter.value) {
            (FilterOp::Eq, Value::Null) => {
                let path = self.bind(path);
                self.sql.push_str(&format!(" AND json_extract(data, {path}) IS NULL"));
                true
            }
            (FilterOp::Eq, Value::String(expected)) => {
                let type_path = self.bind(path.clone());
                let value_path = self.bind(path);
                let expected = self.bind(expected.clone());
                self.sql.push_str(&format!(
                    " AND json_type(data, {type_path}) = 'text' AND json_extract(data, {value_path}) = {expected}"
                ));
                true
            }
            (FilterOp::In, Value::Array(candidates))
                if !candidates.is_empty() && candidates.iter().all(Value::is_string) =>
            {
                let type_path = self.bind(path.clone());
                let value_path = self.bind(path);
                let placeholders: Vec<String> = candidates
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|candidate| self.bind(candidate))
                    .collect();
                self.sql.push_str(&format!(
                    " AND json_type(data, {type_path}) = 'text' AND json_extract(data, {value_path}) IN ({})",
                    placeholders.join(", ")
                ));
                true
            }
            _ => false,
        }
    }
}

fn is_plain_path(field: &str) -> bool {
    !field.is_empty()
        && field
            .split('.')
            .all(|key| !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

/// 基于SQLite的文档存储
///
/// 所有集合共用 `documents` 表，数据列保存JSON文本。提交在一个数据库事务中
/// 完成，每次写入都带版本条件，条件不满足时整个事务回滚。
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    events: broadcast::Sender<ChangeEvent>,
    max_batch_ops: usize,
    /// 进程内串行化写事务，避免多个连接同时升级写锁时返回 SQLITE_BUSY
    commit_lock: Mutex<()>,
}

impl SqliteDocumentStore {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connection_timeout: Duration,
        max_batch_ops: usize,
    ) -> DispatchResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DispatchError::config_error(format!("无效的SQLite连接串 {url}: {e}")))?
            .create_if_missing(true)
            .busy_timeout(connection_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connection_timeout)
            .connect_with(options)
            .await?;

        let store = Self::with_pool(pool, max_batch_ops);
        store.init_schema().await?;
        info!("SQLite文档存储已连接: {}", url);
        Ok(store)
    }

    pub fn with_pool(pool: SqlitePool, max_batch_ops: usize) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            pool,
            events,
            max_batch_ops,
            commit_lock: Mutex::new(()),
        }
    }

    pub async fn init_schema(&self) -> DispatchResult<()> {
        sqlx::query(CREATE_DOCUMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn health_check(&self) -> DispatchResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    fn row_to_document(row: &SqliteRow) -> DispatchResult<StoredDocument> {
        let data: String = row.try_get("data")?;
        let version: i64 = row.try_get("version")?;
        Ok(StoredDocument {
            id: row.try_get("id")?,
            version: version as u64,
            data: serde_json::from_str(&data)?,
        })
    }

    async fn current_version(
        tx: &mut Transaction<'_, Sqlite>,
        collection: Collection,
        id: &str,
    ) -> DispatchResult<Option<u64>> {
        let row = sqlx::query("SELECT version FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<i64, _>("version")? as u64)),
            None => Ok(None),
        }
    }

    async fn apply_op(
        tx: &mut Transaction<'_, Sqlite>,
        op: &WriteOp,
    ) -> DispatchResult<Option<ChangeEvent>> {
        let current = Self::current_version(tx, op.collection(), op.id()).await?;
        check_precondition(op, current)?;

        match op {
            WriteOp::Put {
                collection,
                id,
                data,
                ..
            } => {
                let text = serde_json::to_string(data)?;
                let (version, kind) = match current {
                    None => {
                        sqlx::query(
                            "INSERT INTO documents (collection, id, version, data) VALUES ($1, $2, 1, $3)",
                        )
                        .bind(collection.as_str())
                        .bind(id)
                        .bind(text)
                        .execute(&mut **tx)
                        .await?;
                        (1, ChangeKind::Created)
                    }
                    Some(version) => {
                        let result = sqlx::query(
                            "UPDATE documents SET data = $1, version = version + 1 WHERE collection = $2 AND id = $3 AND version = $4",
                        )
                        .bind(text)
                        .bind(collection.as_str())
                        .bind(id)
                        .bind(version as i64)
                        .execute(&mut **tx)
                        .await?;
                        if result.rows_affected() != 1 {
                            return Err(DispatchError::conflict(format!(
                                "文档 {}/{} 在提交过程中被修改",
                                collection.as_str(),
                                id
                            )));
                        }
                        (version + 1, ChangeKind::Updated)
                    }
                };
                Ok(Some(ChangeEvent {
                    collection: *collection,
                    id: id.clone(),
                    kind,
                    version,
                    data: Some(data.clone()),
                }))
            }
            WriteOp::Check { .. } => Ok(None),
            WriteOp::Delete { collection, id, .. } => {
                let Some(version) = current else {
                    return Ok(None);
                };
                sqlx::query(
                    "DELETE FROM documents WHERE collection = $1 AND id = $2 AND version = $3",
                )
                .bind(collection.as_str())
                .bind(id)
                .bind(version as i64)
                .execute(&mut **tx)
                .await?;
                Ok(Some(ChangeEvent {
                    collection: *collection,
                    id: id.clone(),
                    kind: ChangeKind::Deleted,
                    version,
                    data: None,
                }))
            }
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, collection: Collection, id: &str) -> DispatchResult<Option<StoredDocument>> {
        let row = sqlx::query(
            "SELECT id, version, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn query(
        &self,
        collection: Collection,
        query: &Query,
    ) -> DispatchResult<Vec<StoredDocument>> {
        let select = SelectStatement::build(collection, query);
        let mut statement = sqlx::query(&select.sql);
        for arg in &select.args {
            statement = statement.bind(arg.as_str());
        }
        let rows = statement.fetch_all(&self.pool).await?;

        let documents = rows
            .iter()
            .map(Self::row_to_document)
            .collect::<DispatchResult<Vec<_>>>()?;
        // 未能下推的条件与排序在内存中完成
        Ok(query.apply(documents))
    }

    async fn commit(&self, batch: WriteBatch) -> DispatchResult<()> {
        batch.validate(self.max_batch_ops)?;

        let _guard = self.commit_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut events = Vec::with_capacity(batch.len());

        for op in batch.ops() {
            // 任一操作失败时 tx 被丢弃，事务自动回滚
            if let Some(event) = Self::apply_op(&mut tx, op).await? {
                events.push(event);
            }
        }
        tx.commit().await?;

        debug!("SQLite存储提交成功，写入 {} 个文档", events.len());
        for event in events {
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

#[cfg(test)]
mod tests {
    use super::*;
    use saferide_domain::store::SortDirection;

    #[test]
    fn test_string_filters_and_limit_are_pushed_down() {
        let query = Query::new()
            .filter(Filter::eq("requester_id", "m1"))
            .filter(Filter::is_in("status", vec!["OPEN", "BOUND"]))
            .filter(Filter::is_null("ended_at"))
            .limit(1);
        let select = SelectStatement::build(Collection::Requests, &query);

        assert_eq!(
            select.sql,
            "SELECT id, version, data FROM documents WHERE collection = $1 \
             AND json_type(data, $2) = 'text' AND json_extract(data, $3) = $4 \
             AND json_type(data, $5) = 'text' AND json_extract(data, $6) IN ($7, $8) \
             AND json_extract(data, $9) IS NULL ORDER BY id LIMIT 1"
        );
        assert_eq!(
            select.args,
            vec![
                "requests", "$.requester_id", "$.requester_id", "m1", "$.status", "$.status",
                "OPEN", "BOUND", "$.ended_at",
            ]
        );
    }

    #[test]
    fn test_limit_stays_in_memory_when_not_exact() {
        let ranged = Query::new().filter(Filter::gt("priority", 10)).limit(5);
        let select = SelectStatement::build(Collection::Requests, &ranged);
        assert!(!select.sql.contains("LIMIT"));
        assert_eq!(select.args.len(), 1);

        let ordered = Query::new()
            .filter(Filter::eq("group_id", "g1"))
            .order_by("started_at", SortDirection::Asc)
            .limit(5);
        let select = SelectStatement::build(Collection::DriverSessions, &ordered);
        assert!(select.sql.contains("json_extract(data, $3) = $4"));
        assert!(!select.sql.contains("LIMIT"));
    }

    #[test]
    fn test_unusual_field_names_are_not_pushed() {
        let query = Query::new().filter(Filter::eq("a'b", "x")).limit(1);
        let select = SelectStatement::build(Collection::Members, &query);
        assert_eq!(select.args, vec!["members"]);
        assert!(!select.sql.contains("LIMIT"));
        assert!(!is_plain_path("pickup..address"));
        assert!(is_plain_path("pickup.address"));
    }
}
