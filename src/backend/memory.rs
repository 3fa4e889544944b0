//! In-process document store (`db_config.type = "memory"`)
//!
//! Records live in insertion order inside the process. Stores are handed out
//! by a [`MemoryCatalog`] keyed by database and collection, so reinstalling an
//! automation on hot reload keeps its data.

use super::{
    record_key, values_equal, BackendError, Page, Record, StorageBackend, DEFAULT_PAGE_SIZE,
    RECORD_ID_KEY,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug)]
pub struct MemoryBackend {
    collection: String,
    records: RwLock<Vec<Record>>,
}

impl MemoryBackend {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            records: RwLock::new(Vec::new()),
        }
    }
}

fn key_of(record: &Record) -> Option<String> {
    record.get(RECORD_ID_KEY).and_then(|id| record_key(id).ok())
}

fn matches(record: &Record, filter: &Record) -> bool {
    filter.iter().all(|(field, expected)| match record.get(field) {
        Some(actual) if field == RECORD_ID_KEY => {
            record_key(actual).ok() == record_key(expected).ok()
        }
        Some(actual) => values_equal(actual, expected),
        None => false,
    })
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn backend_type(&self) -> &str {
        "memory"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn list(&self, filter: &Record, limit: u64, offset: u64) -> Result<Page, BackendError> {
        let records = self.records.read().await;
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };

        let matching: Vec<&Record> = records.iter().filter(|r| matches(r, filter)).collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(Page { records: page, total })
    }

    async fn get(&self, id: &Value) -> Result<Option<Record>, BackendError> {
        let key = record_key(id)?;
        let records = self.records.read().await;
        Ok(records.iter().find(|r| key_of(r).as_deref() == Some(key.as_str())).cloned())
    }

    async fn insert(&self, mut fields: Record) -> Result<Record, BackendError> {
        let key = match fields.get(RECORD_ID_KEY) {
            Some(id) => record_key(id)?,
            None => Uuid::new_v4().to_string(),
        };

        let mut records = self.records.write().await;
        if records.iter().any(|r| key_of(r).as_deref() == Some(key.as_str())) {
            return Err(BackendError::DuplicateKey(key));
        }
        fields.insert(RECORD_ID_KEY.to_string(), Value::String(key));
        records.push(fields.clone());
        Ok(fields)
    }

    async fn update(&self, id: &Value, mut fields: Record) -> Result<Option<Record>, BackendError> {
        let key = record_key(id)?;
        fields.remove(RECORD_ID_KEY);

        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|r| key_of(r).as_deref() == Some(key.as_str())) else {
            return Ok(None);
        };
        record.extend(fields);
        Ok(Some(record.clone()))
    }

    async fn delete(&self, id: &Value) -> Result<bool, BackendError> {
        let key = record_key(id)?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| key_of(r).as_deref() != Some(key.as_str()));
        Ok(records.len() < before)
    }
}

/// Hands out one shared [`MemoryBackend`] per `database/collection`
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    stores: Mutex<HashMap<String, Arc<MemoryBackend>>>,
}

impl MemoryCatalog {
    pub fn open(&self, database: &str, collection: &str) -> Arc<MemoryBackend> {
        let mut stores = self.stores.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        stores
            .entry(format!("{database}/{collection}"))
            .or_insert_with(|| Arc::new(MemoryBackend::new(collection)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn crud_cycle() {
        let store = MemoryBackend::new("tasks");
        let created = store.insert(record(json!({"title": "a", "priority": 1}))).await.unwrap();
        let id = created["id"].clone();

        let updated = store
            .update(&id, record(json!({"priority": 2, "id": "ignored"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["priority"], 2);
        assert_eq!(updated["title"], "a");
        assert_eq!(updated["id"], id);

        assert!(store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn numeric_ids_match_their_string_form() {
        let store = MemoryBackend::new("tasks");
        store.insert(record(json!({"id": 7, "title": "x"}))).await.unwrap();
        assert!(store.get(&json!("7")).await.unwrap().is_some());
        assert_eq!(
            store.insert(record(json!({"id": "7"}))).await.unwrap_err(),
            BackendError::DuplicateKey("7".to_string())
        );
    }

    #[tokio::test]
    async fn list_counts_before_paging() {
        let store = MemoryBackend::new("tasks");
        for i in 0..5 {
            store
                .insert(record(json!({"n": i, "even": i % 2 == 0})))
                .await
                .unwrap();
        }
        let mut filter = Record::new();
        filter.insert("even".into(), json!(true));
        let page = store.list(&filter, 2, 1).await.unwrap();
        assert_eq!(page.total, 3);
        let ns: Vec<_> = page.records.iter().map(|r| r["n"].clone()).collect();
        assert_eq!(ns, vec![json!(2), json!(4)]);

        let mut by_number = Record::new();
        by_number.insert("n".into(), json!(3.0));
        assert_eq!(store.list(&by_number, 0, 0).await.unwrap().total, 1);
    }
}
