/// SQLite persistence for automation definitions
///
/// Documents are stored as JSON text next to a few indexed lookup columns.

use super::DefinitionStore;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct SqliteDefinitionStore {
    pool: SqlitePool,
}

impl SqliteDefinitionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the automations table. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS automations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                definition TEXT NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_automations_status ON automations(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl DefinitionStore for SqliteDefinitionStore {
    fn describe(&self) -> String {
        "sqlite table automations".to_string()
    }

    async fn get(&self, id: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT definition FROM automations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM automations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Upsert; `name` and `status` are copied out of the document for indexing
    async fn put(&self, id: &str, document: &Value) -> Result<()> {
        let name = document.get("name").and_then(Value::as_str).unwrap_or_default();
        let status = document.get("status").and_then(Value::as_str).unwrap_or("draft");
        let definition = serde_json::to_string(document)?;

        sqlx::query(
            r#"
            INSERT INTO automations (id, name, status, definition, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(status)
        .bind(&definition)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM automations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteDefinitionStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteDefinitionStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn upserts_documents() {
        let store = store().await;
        store.put("tasks", &json!({"id": "tasks", "name": "Tasks"})).await.unwrap();
        store
            .put("tasks", &json!({"id": "tasks", "name": "Tasks v2", "status": "active"}))
            .await
            .unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["tasks"]);
        let document = store.get("tasks").await.unwrap().unwrap();
        assert_eq!(document["name"], "Tasks v2");

        let status: String = sqlx::query("SELECT status FROM automations WHERE id = 'tasks'")
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .get("status");
        assert_eq!(status, "active");
    }

    #[tokio::test]
    async fn delete_reports_absence() {
        let store = store().await;
        assert!(store.get("ghost").await.unwrap().is_none());
        assert!(!store.delete("ghost").await.unwrap());
        store.put("ghost", &json!({})).await.unwrap();
        assert!(store.delete("ghost").await.unwrap());
        // Schema init is idempotent
        store.init_schema().await.unwrap();
    }
}
