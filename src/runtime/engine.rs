/// Automation engine
///
/// Compiles a definition document and binds it to a storage backend, producing a
/// [`LiveAutomation`]: one [`EndpointExecutor`] per declared endpoint, all sharing
/// the same backend instance. Live automations are immutable; changing a
/// definition means building a new one and swapping it into the registry.

use crate::automation::{validate, CompiledAutomation};
use crate::backend::{BackendFactory, StorageBackend};
use crate::error::AutomationError;
use crate::runtime::auth::AuthGate;
use crate::runtime::executor::EndpointExecutor;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug)]
pub struct AutomationEngine {
    backends: Arc<BackendFactory>,
    auth: Arc<AuthGate>,
}

impl AutomationEngine {
    pub fn new(backends: Arc<BackendFactory>, auth: Arc<AuthGate>) -> Self {
        Self { backends, auth }
    }

    /// Validate, compile and bind a raw definition document
    pub fn compile(&self, document: &Value) -> Result<LiveAutomation, AutomationError> {
        let compiled = validate(document).map_err(AutomationError::DefinitionInvalid)?;
        self.bind(compiled)
    }

    /// Bind an already compiled automation to its backend
    pub fn bind(&self, compiled: CompiledAutomation) -> Result<LiveAutomation, AutomationError> {
        let backend = self.backends.create(&compiled.definition.db_config)?;
        Ok(LiveAutomation::new(compiled, backend, self.auth.clone()))
    }
}

/// A compiled automation bound to a backend, ready to serve requests
#[derive(Debug)]
pub struct LiveAutomation {
    compiled: CompiledAutomation,
    backend: Arc<dyn StorageBackend>,
    executors: Vec<EndpointExecutor>,
}

impl LiveAutomation {
    pub fn new(compiled: CompiledAutomation, backend: Arc<dyn StorageBackend>, auth: Arc<AuthGate>) -> Self {
        let executors = compiled
            .endpoints
            .iter()
            .map(|endpoint| {
                EndpointExecutor::new(
                    compiled.definition.id.clone(),
                    endpoint.clone(),
                    backend.clone(),
                    auth.clone(),
                )
            })
            .collect();

        Self {
            compiled,
            backend,
            executors,
        }
    }

    pub fn id(&self) -> &str {
        self.compiled.id()
    }

    pub fn compiled(&self) -> &CompiledAutomation {
        &self.compiled
    }

    pub fn is_active(&self) -> bool {
        self.compiled.is_active()
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Executors in endpoint declaration order
    pub fn executors(&self) -> &[EndpointExecutor] {
        &self.executors
    }

    pub fn executor(&self, index: usize) -> Option<&EndpointExecutor> {
        self.executors.get(index)
    }

    pub fn to_document(&self) -> Value {
        self.compiled.to_document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendContext, DatabaseManager};
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> AutomationEngine {
        let context = BackendContext {
            database_url: None,
            database_name: "council_db".to_string(),
            timeout: Duration::from_secs(1),
            databases: Arc::new(DatabaseManager::new("data".to_string())),
        };
        AutomationEngine::new(
            Arc::new(BackendFactory::with_builtin(context)),
            Arc::new(AuthGate::disabled()),
        )
    }

    #[test]
    fn binds_one_executor_per_endpoint() {
        let live = engine()
            .compile(&json!({
                "id": "notes",
                "name": "notes",
                "base_path": "/notes",
                "endpoints": [
                    {"path": "/", "method": "GET"},
                    {"path": "/", "method": "POST"}
                ],
                "db_config": {"type": "memory", "collection_name": "notes"}
            }))
            .unwrap();
        assert_eq!(live.id(), "notes");
        assert_eq!(live.executors().len(), 2);
        assert_eq!(live.backend().collection(), "notes");
        assert!(!live.is_active());
        assert!(live.executor(2).is_none());
    }

    #[test]
    fn invalid_documents_and_unknown_backends_are_definition_errors() {
        let err = engine().compile(&json!({"id": "x"})).unwrap_err();
        assert_eq!(err.kind(), "definition_invalid");

        let err = engine()
            .compile(&json!({
                "id": "x",
                "name": "x",
                "base_path": "/x",
                "endpoints": [],
                "db_config": {"type": "cassandra", "collection_name": "x"}
            }))
            .unwrap_err();
        assert_eq!(err.violations()[0].field, "db_config.type");
    }
}
