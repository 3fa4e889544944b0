//! Relational backend (`db_config.type = "sqlite"`)
//!
//! Each collection is a table `{collection}(id TEXT PRIMARY KEY, data TEXT, ...)`
//! holding the record body as a JSON object. Equality filters are evaluated
//! with `json_extract`, partial updates with `json_patch`. The pool and the
//! table are created lazily on first use.
//!
//! `db_config.config` keys:
//! - `connection_string`: a `sqlite:` URL (falls back to `DATABASE_URL`)
//! - `database`: file name under the data directory, used when no URL applies

use super::{
    record_key, with_timeout, BackendContext, BackendError, DatabaseManager, Page, Record,
    StorageBackend, DEFAULT_PAGE_SIZE, RECORD_ID_KEY,
};
use crate::automation::DbBinding;
use crate::error::{Rule, Violation};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

#[derive(Debug)]
pub struct SqliteBackend {
    databases: Arc<DatabaseManager>,
    url: String,
    table: String,
    /// `table` as a quoted identifier, so keywords like `order` stay usable
    quoted_table: String,
    timeout: Duration,
    pool: OnceCell<SqlitePool>,
}

impl SqliteBackend {
    pub fn new(databases: Arc<DatabaseManager>, url: String, table: String, timeout: Duration) -> Self {
        Self {
            databases,
            url,
            quoted_table: quote_identifier(&table),
            table,
            timeout,
            pool: OnceCell::new(),
        }
    }

    /// Resolve the connection URL for a binding. No connection is opened here.
    pub fn from_binding(binding: &DbBinding, context: &BackendContext) -> Result<Self, Vec<Violation>> {
        let url = match binding.config_str("connection_string") {
            Some(url) if url.starts_with("sqlite:") => url.to_string(),
            Some(other) => {
                return Err(vec![Violation::new(
                    "db_config.config.connection_string",
                    Rule::UnsupportedValue,
                    format!("'{other}' is not a sqlite: connection string"),
                )])
            }
            None => match (&context.database_url, binding.config_str("database")) {
                (Some(url), None) if url.starts_with("sqlite:") => url.clone(),
                _ => context.databases.database_url(context.database_for(binding)),
            },
        };

        Ok(Self::new(
            context.databases.clone(),
            url,
            binding.collection_name.clone(),
            context.timeout,
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn pool(&self) -> Result<&SqlitePool, BackendError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = self
                    .databases
                    .get_pool(&self.url)
                    .await
                    .map_err(|e| BackendError::Unavailable(format!("{e:#}")))?;

                let create_sql = format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id TEXT PRIMARY KEY,
                        data TEXT NOT NULL,
                        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                    )",
                    self.quoted_table
                );
                sqlx::query(&create_sql)
                    .execute(&pool)
                    .await
                    .map_err(map_sqlx_error)?;

                tracing::debug!("🔧 Table ready: {} ({})", self.table, self.url);
                Ok(pool)
            })
            .await
    }

    async fn list_inner(&self, filter: &Record, limit: u64, offset: u64) -> Result<Page, BackendError> {
        let pool = self.pool().await?;

        let mut clause = String::new();
        for (index, field) in filter.keys().enumerate() {
            clause.push_str(if index == 0 { " WHERE " } else { " AND " });
            if field == RECORD_ID_KEY {
                clause.push_str("id = ?");
            } else {
                clause.push_str("json_extract(data, ?) = ?");
            }
        }

        let count_sql = format!("SELECT COUNT(*) AS total FROM {}{}", self.quoted_table, clause);
        let total: i64 = bind_filter(sqlx::query(&count_sql), filter)?
            .fetch_one(pool)
            .await
            .map_err(map_sqlx_error)?
            .try_get("total")
            .map_err(map_sqlx_error)?;

        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
        let select_sql = format!(
            "SELECT id, data FROM {}{} ORDER BY rowid LIMIT ? OFFSET ?",
            self.quoted_table, clause
        );
        let rows = bind_filter(sqlx::query(&select_sql), filter)?
            .bind(clamp_i64(limit))
            .bind(clamp_i64(offset))
            .fetch_all(pool)
            .await
            .map_err(map_sqlx_error)?;

        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            records,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    async fn get_inner(&self, key: &str) -> Result<Option<Record>, BackendError> {
        let pool = self.pool().await?;
        let sql = format!("SELECT id, data FROM {} WHERE id = ?", self.quoted_table);
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert_inner(&self, mut fields: Record) -> Result<Record, BackendError> {
        let pool = self.pool().await?;
        let key = match fields.remove(RECORD_ID_KEY) {
            Some(id) => record_key(&id)?,
            None => Uuid::new_v4().to_string(),
        };
        let data = encode(&fields)?;

        let sql = format!("INSERT INTO {} (id, data) VALUES (?, ?)", self.quoted_table);
        sqlx::query(&sql)
            .bind(&key)
            .bind(&data)
            .execute(pool)
            .await
            .map_err(|e| match map_sqlx_error(e) {
                BackendError::DuplicateKey(_) => BackendError::DuplicateKey(key.clone()),
                other => other,
            })?;

        fields.insert(RECORD_ID_KEY.to_string(), Value::String(key));
        Ok(fields)
    }

    async fn update_inner(&self, key: &str, mut fields: Record) -> Result<Option<Record>, BackendError> {
        let pool = self.pool().await?;
        fields.remove(RECORD_ID_KEY);
        if fields.is_empty() {
            return self.get_inner(key).await;
        }
        let patch = encode(&fields)?;

        let sql = format!(
            "UPDATE {} SET data = json_patch(data, ?), updated_at = CURRENT_TIMESTAMP
             WHERE id = ? RETURNING id, data",
            self.quoted_table
        );
        let row = sqlx::query(&sql)
            .bind(&patch)
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn delete_inner(&self, key: &str) -> Result<bool, BackendError> {
        let pool = self.pool().await?;
        let sql = format!("DELETE FROM {} WHERE id = ?", self.quoted_table);
        let result = sqlx::query(&sql)
            .bind(key)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn backend_type(&self) -> &str {
        "sqlite"
    }

    fn collection(&self) -> &str {
        &self.table
    }

    async fn list(&self, filter: &Record, limit: u64, offset: u64) -> Result<Page, BackendError> {
        with_timeout(self.timeout, "list", self.list_inner(filter, limit, offset)).await
    }

    async fn get(&self, id: &Value) -> Result<Option<Record>, BackendError> {
        let key = record_key(id)?;
        with_timeout(self.timeout, "get", self.get_inner(&key)).await
    }

    async fn insert(&self, fields: Record) -> Result<Record, BackendError> {
        with_timeout(self.timeout, "insert", self.insert_inner(fields)).await
    }

    async fn update(&self, id: &Value, fields: Record) -> Result<Option<Record>, BackendError> {
        let key = record_key(id)?;
        with_timeout(self.timeout, "update", self.update_inner(&key, fields)).await
    }

    async fn delete(&self, id: &Value) -> Result<bool, BackendError> {
        let key = record_key(id)?;
        with_timeout(self.timeout, "delete", self.delete_inner(&key)).await
    }
}

/// Bind `(json path, value)` pairs for every filter entry, in key order
fn bind_filter<'q>(mut query: SqliteQuery<'q>, filter: &Record) -> Result<SqliteQuery<'q>, BackendError> {
    for (field, value) in filter {
        if field == RECORD_ID_KEY {
            query = query.bind(record_key(value)?);
        } else {
            query = bind_value(query.bind(format!("$.{field}")), value);
        }
    }
    Ok(query)
}

/// Bind a JSON scalar with the SQLite type `json_extract` yields for it
fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::String(s) => query.bind(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::Bool(b) => query.bind(*b),
        Value::Null => query.bind(None::<String>),
        _ => query.bind(value.to_string()),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn row_to_record(row: &SqliteRow) -> Result<Record, BackendError> {
    let id: String = row.try_get("id").map_err(map_sqlx_error)?;
    let data: String = row.try_get("data").map_err(map_sqlx_error)?;
    let mut record = match serde_json::from_str::<Value>(&data) {
        Ok(Value::Object(record)) => record,
        Ok(other) => {
            return Err(BackendError::Internal(format!(
                "record '{id}' holds {other} instead of a JSON object"
            )))
        }
        Err(e) => return Err(BackendError::Internal(format!("record '{id}' is not valid JSON: {e}"))),
    };
    record.insert(RECORD_ID_KEY.to_string(), Value::String(id));
    Ok(record)
}

fn encode(fields: &Record) -> Result<String, BackendError> {
    serde_json::to_string(fields).map_err(|e| BackendError::Internal(e.to_string()))
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Transient conditions become `Unavailable`; everything unexpected is `Internal`
fn map_sqlx_error(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => BackendError::Unavailable(err.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            BackendError::DuplicateKey(db.message().to_string())
        }
        sqlx::Error::Database(db)
            if db.message().contains("database is locked") || db.message().contains("busy") =>
        {
            BackendError::Unavailable(db.message().to_string())
        }
        _ => BackendError::Internal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(table: &str) -> SqliteBackend {
        SqliteBackend::new(
            Arc::new(DatabaseManager::new("unused".to_string())),
            "sqlite::memory:".to_string(),
            table.to_string(),
            Duration::from_secs(5),
        )
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_id_and_get_reads_back() {
        let tasks = backend("tasks");
        let created = tasks
            .insert(record(json!({"title": "write docs", "priority": 3})))
            .await
            .unwrap();
        let id = created["id"].clone();
        assert!(id.as_str().is_some_and(|s| !s.is_empty()));

        let fetched = tasks.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(tasks.get(&json!("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_reported() {
        let tasks = backend("tasks");
        tasks.insert(record(json!({"id": "t1"}))).await.unwrap();
        let err = tasks.insert(record(json!({"id": "t1"}))).await.unwrap_err();
        assert_eq!(err, BackendError::DuplicateKey("t1".to_string()));
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let tasks = backend("tasks");
        for (title, done, priority) in [("a", false, 1), ("b", true, 3), ("c", false, 3), ("d", false, 3)] {
            tasks
                .insert(record(json!({"title": title, "completed": done, "priority": priority})))
                .await
                .unwrap();
        }

        let mut filter = Record::new();
        filter.insert("completed".into(), json!(false));
        filter.insert("priority".into(), json!(3));
        let page = tasks.list(&filter, 1, 1).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0]["title"], "d");

        let all = tasks.list(&Record::new(), 0, 0).await.unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.records[0]["title"], "a");
    }

    #[tokio::test]
    async fn update_is_partial() {
        let tasks = backend("tasks");
        let created = tasks
            .insert(record(json!({"title": "a", "priority": 1})))
            .await
            .unwrap();
        let updated = tasks
            .update(&created["id"], record(json!({"priority": 5})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["title"], "a");
        assert_eq!(updated["priority"], 5);
        assert_eq!(updated["id"], created["id"]);

        assert!(tasks
            .update(&json!("missing"), record(json!({"priority": 1})))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_went_away() {
        let tasks = backend("tasks");
        let created = tasks.insert(record(json!({"title": "a"}))).await.unwrap();
        assert!(tasks.delete(&created["id"]).await.unwrap());
        assert!(!tasks.delete(&created["id"]).await.unwrap());
    }

    #[tokio::test]
    async fn keyword_table_names_work() {
        for table in ["order", "group", "index", "table"] {
            let records = backend(table);
            let created = records.insert(record(json!({"total": 12}))).await.unwrap();
            assert_eq!(records.get(&created["id"]).await.unwrap(), Some(created.clone()));
            assert_eq!(records.list(&Record::new(), 0, 0).await.unwrap().total, 1);
            assert!(records.update(&created["id"], record(json!({"total": 13}))).await.unwrap().is_some());
            assert!(records.delete(&created["id"]).await.unwrap());
        }
        assert_eq!(quote_identifier("order"), "\"order\"");
    }

    #[test]
    fn binding_resolution() {
        let context = BackendContext {
            database_url: None,
            database_name: "council_db".to_string(),
            timeout: Duration::from_secs(1),
            databases: Arc::new(DatabaseManager::new("data".to_string())),
        };
        let mut binding = DbBinding {
            backend_type: "sqlite".to_string(),
            config: serde_json::Map::new(),
            collection_name: "tasks".to_string(),
        };
        let backend = SqliteBackend::from_binding(&binding, &context).unwrap();
        assert!(backend.url().ends_with("council_db.db"));

        binding
            .config
            .insert("connection_string".into(), json!("mongodb://localhost"));
        let violations = SqliteBackend::from_binding(&binding, &context).unwrap_err();
        assert_eq!(violations[0].field, "db_config.config.connection_string");
    }
}
