//! Storage Backend Adapter
//!
//! A uniform CRUD contract over heterogeneous databases. Each backend type is
//! one implementation of [`StorageBackend`], created by a constructor
//! registered in the [`BackendFactory`] under its `db_config.type`
//! discriminator. One backend instance is shared by every endpoint of the
//! automation it was built for and must be safe for concurrent use.

// Lazily created, shared SQLite connection pools
pub mod database;

// Relational backend: one table per collection, records stored as JSON text
pub mod sqlite;

// In-process document store
pub mod memory;

use crate::automation::path::is_identifier;
use crate::automation::DbBinding;
use crate::error::{AutomationError, Rule, Violation};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use database::DatabaseManager;
pub use memory::{MemoryBackend, MemoryCatalog};
pub use sqlite::SqliteBackend;

/// A stored record: a JSON object carrying its identifier under [`RECORD_ID_KEY`]
pub type Record = Map<String, Value>;

pub const RECORD_ID_KEY: &str = "id";

/// Page size used when a caller asks for `limit = 0`
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Failures reported by a backend implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Transient: connection refused, pool exhausted, timed out, database locked
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("a record with id '{0}' already exists")]
    DuplicateKey(String),

    /// The backend broke its contract (corrupt row, unexpected driver error)
    #[error("backend error: {0}")]
    Internal(String),
}

/// One page of a filtered listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Number of records matching the filter, ignoring limit and offset
    pub total: u64,
}

/// Capability set every backend type implements
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Discriminator this backend was registered under
    fn backend_type(&self) -> &str;

    fn collection(&self) -> &str;

    /// Equality-filtered listing. `limit = 0` means the backend default.
    async fn list(&self, filter: &Record, limit: u64, offset: u64) -> Result<Page, BackendError>;

    async fn get(&self, id: &Value) -> Result<Option<Record>, BackendError>;

    /// Store a new record, assigning an identifier when `fields` has none
    async fn insert(&self, fields: Record) -> Result<Record, BackendError>;

    /// Partial update: only keys present in `fields` change
    async fn update(&self, id: &Value, fields: Record) -> Result<Option<Record>, BackendError>;

    /// `true` when a record was removed, `false` when none matched
    async fn delete(&self, id: &Value) -> Result<bool, BackendError>;
}

/// Canonical string key for an identifier value
pub fn record_key(id: &Value) -> Result<String, BackendError> {
    match id {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => Err(
            BackendError::Internal(format!("record identifier must be a string or number, got {id}")),
        ),
    }
}

/// Equality used for filters: numbers compare by value (`3 == 3.0`), everything else structurally
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

/// Run a backend operation under a deadline; expiry surfaces as `Unavailable`
pub async fn with_timeout<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Unavailable(format!(
            "{operation} did not complete within {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Process-wide defaults handed to backend constructors
#[derive(Debug, Clone)]
pub struct BackendContext {
    /// Default connection string (`DATABASE_URL`)
    pub database_url: Option<String>,
    /// Default database name (`DATABASE_NAME`)
    pub database_name: String,
    /// Per-operation deadline
    pub timeout: Duration,
    pub databases: Arc<DatabaseManager>,
}

impl BackendContext {
    /// Database name for a binding: `config.database`, else the process default
    pub fn database_for<'a>(&'a self, binding: &'a DbBinding) -> &'a str {
        binding.config_str("database").unwrap_or(&self.database_name)
    }
}

pub type BackendConstructor = Arc<
    dyn Fn(&DbBinding, &BackendContext) -> Result<Arc<dyn StorageBackend>, Vec<Violation>>
        + Send
        + Sync,
>;

/// Registry of backend constructors keyed by `db_config.type`
pub struct BackendFactory {
    constructors: HashMap<String, BackendConstructor>,
    context: BackendContext,
}

impl fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactory")
            .field("backend_types", &self.backend_types())
            .field("context", &self.context)
            .finish()
    }
}

impl BackendFactory {
    /// Factory without any backend types
    pub fn new(context: BackendContext) -> Self {
        Self {
            constructors: HashMap::new(),
            context,
        }
    }

    /// Factory with the built-in `sqlite` and `memory` backends registered
    pub fn with_builtin(context: BackendContext) -> Self {
        let mut factory = Self::new(context);

        factory.register(
            "sqlite",
            Arc::new(
                |binding: &DbBinding,
                 context: &BackendContext|
                 -> Result<Arc<dyn StorageBackend>, Vec<Violation>> {
                let backend = SqliteBackend::from_binding(binding, context)?;
                Ok(Arc::new(backend))
            }),
        );

        let catalog = Arc::new(MemoryCatalog::default());
        factory.register(
            "memory",
            Arc::new(
                move |binding: &DbBinding,
                      context: &BackendContext|
                      -> Result<Arc<dyn StorageBackend>, Vec<Violation>> {
                let backend = catalog.open(context.database_for(binding), &binding.collection_name);
                Ok(backend)
            }),
        );

        factory
    }

    pub fn register(&mut self, backend_type: impl Into<String>, constructor: BackendConstructor) {
        self.constructors.insert(backend_type.into(), constructor);
    }

    pub fn backend_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Build the backend for a binding; configuration problems are definition violations
    pub fn create(&self, binding: &DbBinding) -> Result<Arc<dyn StorageBackend>, AutomationError> {
        let Some(constructor) = self.constructors.get(&binding.backend_type) else {
            return Err(AutomationError::DefinitionInvalid(vec![Violation::new(
                "db_config.type",
                Rule::UnsupportedValue,
                format!(
                    "unknown backend type '{}' (available: {})",
                    binding.backend_type,
                    self.backend_types().join(", ")
                ),
            )]));
        };

        if !is_identifier(&binding.collection_name) {
            return Err(AutomationError::DefinitionInvalid(vec![Violation::new(
                "db_config.collection_name",
                Rule::InvalidFormat,
                format!(
                    "'{}' is not a valid collection name (letters, digits and underscores)",
                    binding.collection_name
                ),
            )]));
        }

        constructor(binding, &self.context).map_err(AutomationError::DefinitionInvalid)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Backend test double that records every call

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        List { filter: Record, limit: u64, offset: u64 },
        Get(Value),
        Insert(Record),
        Update(Value, Record),
        Delete(Value),
    }

    /// Delegates to a [`MemoryBackend`] and keeps a call log
    #[derive(Debug)]
    pub struct RecordingBackend {
        inner: MemoryBackend,
        calls: Mutex<Vec<Call>>,
        fail_with: Mutex<Option<BackendError>>,
    }

    impl RecordingBackend {
        pub fn new(collection: &str) -> Self {
            Self {
                inner: MemoryBackend::new(collection),
                calls: Mutex::new(Vec::new()),
                fail_with: Mutex::new(None),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn fail_next(&self, err: BackendError) {
            *self.fail_with.lock().unwrap() = Some(err);
        }

        fn record(&self, call: Call) -> Result<(), BackendError> {
            self.calls.lock().unwrap().push(call);
            match self.fail_with.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl StorageBackend for RecordingBackend {
        fn backend_type(&self) -> &str {
            "recording"
        }

        fn collection(&self) -> &str {
            self.inner.collection()
        }

        async fn list(&self, filter: &Record, limit: u64, offset: u64) -> Result<Page, BackendError> {
            self.record(Call::List {
                filter: filter.clone(),
                limit,
                offset,
            })?;
            self.inner.list(filter, limit, offset).await
        }

        async fn get(&self, id: &Value) -> Result<Option<Record>, BackendError> {
            self.record(Call::Get(id.clone()))?;
            self.inner.get(id).await
        }

        async fn insert(&self, fields: Record) -> Result<Record, BackendError> {
            self.record(Call::Insert(fields.clone()))?;
            self.inner.insert(fields).await
        }

        async fn update(&self, id: &Value, fields: Record) -> Result<Option<Record>, BackendError> {
            self.record(Call::Update(id.clone(), fields.clone()))?;
            self.inner.update(id, fields).await
        }

        async fn delete(&self, id: &Value) -> Result<bool, BackendError> {
            self.record(Call::Delete(id.clone()))?;
            self.inner.delete(id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> BackendContext {
        BackendContext {
            database_url: None,
            database_name: "council_db".to_string(),
            timeout: Duration::from_millis(500),
            databases: Arc::new(DatabaseManager::new("data".to_string())),
        }
    }

    fn binding(backend_type: &str, collection: &str) -> DbBinding {
        DbBinding {
            backend_type: backend_type.to_string(),
            config: Map::new(),
            collection_name: collection.to_string(),
        }
    }

    #[test]
    fn unknown_backend_type_is_a_definition_violation() {
        let factory = BackendFactory::with_builtin(context());
        let err = factory.create(&binding("mongodb", "tasks")).unwrap_err();
        assert_eq!(err.violations()[0].field, "db_config.type");
        assert_eq!(err.violations()[0].rule, Rule::UnsupportedValue);
    }

    #[test]
    fn collection_name_must_be_identifier() {
        let factory = BackendFactory::with_builtin(context());
        let err = factory.create(&binding("memory", "tasks; DROP")).unwrap_err();
        assert_eq!(err.violations()[0].field, "db_config.collection_name");
    }

    #[tokio::test]
    async fn memory_backends_are_shared_per_collection() {
        let factory = BackendFactory::with_builtin(context());
        let first = factory.create(&binding("memory", "tasks")).unwrap();
        first.insert(json!({"title": "a"}).as_object().unwrap().clone()).await.unwrap();

        let second = factory.create(&binding("memory", "tasks")).unwrap();
        let page = second.list(&Record::new(), 0, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(second.backend_type(), "memory");
    }

    #[tokio::test]
    async fn timeout_maps_to_unavailable() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), "list", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        assert!(values_equal(&json!(3), &json!(3.0)));
        assert!(!values_equal(&json!(3), &json!("3")));
        assert_eq!(record_key(&json!(7)).unwrap(), "7");
        assert!(record_key(&json!(null)).is_err());
    }
}
