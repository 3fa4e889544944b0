/// Automation lifecycle service
///
/// Keeps the definition store and the live registry in step. Every mutation
/// builds a complete new automation, swaps it into the registry and then
/// persists it; if persisting fails the registry is put back the way it was.
/// Mutations are serialized; request serving never waits on them.

use crate::automation::{AutomationRegistry, AutomationStatus, AutomationSummary};
use crate::definitions::{ensure_storable_id, DefinitionStore};
use crate::error::{AutomationError, Rule, Violation};
use crate::runtime::{AutomationEngine, LiveAutomation};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Largest page the listing operation hands out
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug)]
pub struct AutomationService {
    store: Arc<dyn DefinitionStore>,
    registry: Arc<AutomationRegistry>,
    engine: Arc<AutomationEngine>,
    mutations: Mutex<()>,
}

/// Outcome of loading or reloading every stored definition
#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
    /// Registry entries dropped because the store no longer has them
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadOutcome {
    Installed,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomationPage {
    pub items: Vec<AutomationSummary>,
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn automation_not_found(id: &str) -> AutomationError {
    AutomationError::not_found("Automation", id)
}

fn require_object(value: Value, field: &str) -> Result<Map<String, Value>, AutomationError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AutomationError::DefinitionInvalid(vec![Violation::new(
            field,
            Rule::InvalidType,
            "must be a JSON object",
        )])),
    }
}

fn store_error(operation: &str, id: &str, err: anyhow::Error) -> AutomationError {
    tracing::error!("❌ Definition store {} failed for {}: {:#}", operation, id, err);
    AutomationError::from(err)
}

impl AutomationService {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        registry: Arc<AutomationRegistry>,
        engine: Arc<AutomationEngine>,
    ) -> Self {
        Self {
            store,
            registry,
            engine,
            mutations: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<AutomationRegistry> {
        &self.registry
    }

    /// Install every stored definition; broken ones are logged and skipped
    pub async fn load_all(&self) -> Result<LoadReport, AutomationError> {
        let _guard = self.mutations.lock().await;
        let ids = self.store.list().await.map_err(|e| store_error("list", "*", e))?;

        let mut report = LoadReport::default();
        for id in ids {
            match self.install_from_store(&id).await {
                Ok(Some(_)) => report.loaded.push(id),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("⚠️ Skipping automation {}: {}", id, err);
                    report.failed.push(LoadFailure {
                        id,
                        error: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "📥 Loaded {} automation(s) from {} ({} skipped)",
            report.loaded.len(),
            self.store.describe(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Re-read every stored definition and drop registry entries the store no longer has
    pub async fn reload_all(&self) -> Result<LoadReport, AutomationError> {
        let _guard = self.mutations.lock().await;
        let ids = self.store.list().await.map_err(|e| store_error("list", "*", e))?;

        let mut report = LoadReport::default();
        for id in &ids {
            match self.install_from_store(id).await {
                Ok(Some(_)) => report.loaded.push(id.clone()),
                Ok(None) => {
                    if self.registry.remove(id).is_some() {
                        report.removed.push(id.clone());
                    }
                }
                Err(err) => {
                    tracing::warn!("⚠️ Reload of {} failed, keeping the running version: {}", id, err);
                    report.failed.push(LoadFailure {
                        id: id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        for stale in self.registry.ids().into_iter().filter(|id| !ids.contains(id)) {
            if self.registry.remove(&stale).is_some() {
                report.removed.push(stale);
            }
        }

        tracing::info!(
            "🔄 Reloaded {} automation(s), removed {}, failed {}",
            report.loaded.len(),
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Re-read one definition. Absent from the store means removed from the registry.
    pub async fn reload(&self, id: &str) -> Result<ReloadOutcome, AutomationError> {
        let _guard = self.mutations.lock().await;
        match self.install_from_store(id).await? {
            Some(_) => Ok(ReloadOutcome::Installed),
            None if self.registry.remove(id).is_some() => Ok(ReloadOutcome::Removed),
            None => Err(automation_not_found(id)),
        }
    }

    /// Create a new automation.
    ///
    /// Only `name` is needed: a missing `id` is generated, `base_path` defaults
    /// to `/api/{name}`, `status` to draft, `endpoints` to none and `db_config`
    /// to a memory collection named after the automation. `tags` and `owner`
    /// are filed under `metadata`. Timestamps are stamped when absent.
    pub async fn create(&self, document: Value) -> Result<Value, AutomationError> {
        let _guard = self.mutations.lock().await;
        let mut map = require_object(document, "$")?;
        fill_creation_defaults(&mut map);
        let stamp = now();
        map.entry("created_at").or_insert_with(|| Value::String(stamp.clone()));
        map.entry("updated_at").or_insert_with(|| Value::String(stamp));

        let live = self.engine.compile(&Value::Object(map))?;
        let id = live.id().to_string();
        ensure_storable_id(&id).map_err(|e| {
            AutomationError::DefinitionInvalid(vec![Violation::new("id", Rule::InvalidFormat, e.to_string())])
        })?;

        let stored = self.store.get(&id).await.map_err(|e| store_error("get", &id, e))?;
        if stored.is_some() || self.registry.contains(&id) {
            return Err(AutomationError::already_exists("Automation", id));
        }

        let document = self.commit(live, None).await?;
        tracing::info!("🔥 Created automation: {}", id);
        Ok(document)
    }

    /// Merge the given fields into the current definition and recompile.
    ///
    /// Fields left out keep their value; `id` and `created_at` never change.
    pub async fn update(&self, id: &str, changes: Value) -> Result<Value, AutomationError> {
        let _guard = self.mutations.lock().await;
        let previous = self.registry.get(id);
        let stored = match &previous {
            Some(live) => Some(live.to_document()),
            None => self.store.get(id).await.map_err(|e| store_error("get", id, e))?,
        };
        let Some(stored) = stored else {
            return Err(automation_not_found(id));
        };

        let mut document = require_object(stored, "$")?;
        let mut changes = require_object(changes, "$")?;
        for key in ["id", "created_at", "updated_at"] {
            changes.remove(key);
        }
        file_tags_and_owner(&mut changes);
        match changes.remove("metadata") {
            Some(Value::Object(metadata)) => {
                let current = document
                    .entry("metadata")
                    .or_insert_with(|| Value::Object(Map::new()));
                match current {
                    Value::Object(current) => current.extend(metadata),
                    other => *other = Value::Object(metadata),
                }
            }
            Some(Value::Null) | None => {}
            // Left for the validator to reject
            Some(other) => {
                document.insert("metadata".to_string(), other);
            }
        }
        document.extend(changes);
        document.insert("updated_at".to_string(), Value::String(now()));

        let live = self.engine.compile(&Value::Object(document))?;
        let document = self.commit(live, previous).await?;
        tracing::info!("♻️ Updated automation: {}", id);
        Ok(document)
    }

    /// Delete from the store and the registry
    pub async fn delete(&self, id: &str) -> Result<(), AutomationError> {
        let _guard = self.mutations.lock().await;
        let stored = self.store.delete(id).await.map_err(|e| store_error("delete", id, e))?;
        let installed = self.registry.remove(id).is_some();
        if !stored && !installed {
            return Err(automation_not_found(id));
        }
        tracing::info!("🗑️ Deleted automation: {}", id);
        Ok(())
    }

    /// Current document of an installed automation, falling back to the store
    pub async fn get_document(&self, id: &str) -> Result<Value, AutomationError> {
        if let Some(live) = self.registry.get(id) {
            return Ok(live.to_document());
        }
        self.store
            .get(id)
            .await
            .map_err(|e| store_error("get", id, e))?
            .ok_or_else(|| automation_not_found(id))
    }

    /// Installed automations in install order, optionally filtered by status
    pub fn list(&self, status: Option<AutomationStatus>, skip: usize, limit: usize) -> AutomationPage {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let matching: Vec<AutomationSummary> = self
            .registry
            .list()
            .into_iter()
            .filter(|summary| status.map_or(true, |s| summary.status == s))
            .collect();
        let total = matching.len();
        let items = matching.into_iter().skip(skip).take(limit).collect();
        AutomationPage {
            items,
            total,
            skip,
            limit,
        }
    }

    pub async fn activate(&self, id: &str) -> Result<Value, AutomationError> {
        self.set_status(id, AutomationStatus::Active).await
    }

    pub async fn deactivate(&self, id: &str) -> Result<Value, AutomationError> {
        self.set_status(id, AutomationStatus::Inactive).await
    }

    /// Append an endpoint; one without an `id` gets a generated one
    pub async fn add_endpoint(&self, id: &str, endpoint: Value) -> Result<Value, AutomationError> {
        let mut endpoint = require_object(endpoint, "endpoint")?;
        let has_id = endpoint.get("id").is_some_and(|v| !v.is_null());
        if !has_id {
            endpoint.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }

        self.edit(id, |document| {
            endpoints_mut(document)?.push(Value::Object(endpoint));
            Ok(())
        })
        .await
    }

    /// Replace one endpoint, keeping its id
    pub async fn update_endpoint(&self, id: &str, endpoint_id: &str, endpoint: Value) -> Result<Value, AutomationError> {
        let mut endpoint = require_object(endpoint, "endpoint")?;
        endpoint.insert("id".to_string(), Value::String(endpoint_id.to_string()));

        self.edit(id, |document| {
            let slot = endpoints_mut(document)?
                .iter_mut()
                .find(|e| e.get("id").and_then(Value::as_str) == Some(endpoint_id))
                .ok_or_else(|| AutomationError::not_found("Endpoint", endpoint_id))?;
            *slot = Value::Object(endpoint);
            Ok(())
        })
        .await
    }

    pub async fn remove_endpoint(&self, id: &str, endpoint_id: &str) -> Result<Value, AutomationError> {
        self.edit(id, |document| {
            let endpoints = endpoints_mut(document)?;
            let before = endpoints.len();
            endpoints.retain(|e| e.get("id").and_then(Value::as_str) != Some(endpoint_id));
            if endpoints.len() == before {
                return Err(AutomationError::not_found("Endpoint", endpoint_id));
            }
            Ok(())
        })
        .await
    }

    async fn set_status(&self, id: &str, status: AutomationStatus) -> Result<Value, AutomationError> {
        let document = self
            .edit(id, |document| {
                document.insert("status".to_string(), Value::String(status.as_str().to_string()));
                Ok(())
            })
            .await?;
        tracing::info!("🔀 Automation {} is now {}", id, status.as_str());
        Ok(document)
    }

    /// Apply an in-place edit to the installed document, refresh `updated_at`, and commit
    async fn edit<F>(&self, id: &str, apply: F) -> Result<Value, AutomationError>
    where
        F: FnOnce(&mut Map<String, Value>) -> Result<(), AutomationError>,
    {
        let _guard = self.mutations.lock().await;
        let previous = self.registry.get(id).ok_or_else(|| automation_not_found(id))?;

        let mut document = require_object(previous.to_document(), "$")?;
        apply(&mut document)?;
        document.insert("updated_at".to_string(), Value::String(now()));

        let live = self.engine.compile(&Value::Object(document))?;
        self.commit(live, Some(previous)).await
    }

    /// Swap into the registry, then persist; roll the registry back if persisting fails
    async fn commit(
        &self,
        live: LiveAutomation,
        previous: Option<Arc<LiveAutomation>>,
    ) -> Result<Value, AutomationError> {
        let id = live.id().to_string();
        let document = live.to_document();

        self.registry.install(live)?;

        if let Err(err) = self.store.put(&id, &document).await {
            match previous {
                Some(previous) => {
                    if let Err(restore) = self.registry.install_shared(previous) {
                        tracing::error!("❌ Could not restore automation {}: {}", id, restore);
                    }
                }
                None => {
                    self.registry.remove(&id);
                }
            }
            return Err(store_error("put", &id, err));
        }

        Ok(document)
    }

    /// `Ok(None)` when the store has no document under `id`
    async fn install_from_store(&self, id: &str) -> Result<Option<Arc<LiveAutomation>>, AutomationError> {
        let Some(document) = self.store.get(id).await.map_err(|e| store_error("get", id, e))? else {
            return Ok(None);
        };

        let live = self.engine.compile(&document)?;
        if live.id() != id {
            return Err(AutomationError::DefinitionInvalid(vec![Violation::new(
                "id",
                Rule::UnsupportedValue,
                format!("stored under '{}' but declares id '{}'", id, live.id()),
            )]));
        }

        self.registry.install(live)?;
        Ok(self.registry.get(id))
    }
}

/// Defaults for the fields a console create may leave out
fn fill_creation_defaults(map: &mut Map<String, Value>) {
    map.retain(|_, value| !value.is_null());
    file_tags_and_owner(map);

    map.entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    let name = map.get("name").and_then(Value::as_str).map(str::to_string);
    if let Some(name) = name {
        map.entry("base_path")
            .or_insert_with(|| Value::String(format!("/api/{name}")));
        map.entry("db_config").or_insert_with(|| {
            let mut binding = Map::new();
            binding.insert("type".to_string(), Value::String("memory".to_string()));
            binding.insert("collection_name".to_string(), Value::String(collection_name_for(&name)));
            Value::Object(binding)
        });
    }
    map.entry("status")
        .or_insert_with(|| Value::String(AutomationStatus::Draft.as_str().to_string()));
    map.entry("endpoints").or_insert_with(|| Value::Array(Vec::new()));
}

/// Top-level `tags` / `owner` shorthand lands in `metadata`
fn file_tags_and_owner(map: &mut Map<String, Value>) {
    for key in ["tags", "owner"] {
        let Some(value) = map.remove(key) else { continue };
        if value.is_null() {
            continue;
        }
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert(key.to_string(), value);
        }
    }
}

/// Lowercased name with every other character folded to `_`
fn collection_name_for(name: &str) -> String {
    let folded: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if folded.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        folded
    } else {
        format!("_{folded}")
    }
}

fn endpoints_mut(document: &mut Map<String, Value>) -> Result<&mut Vec<Value>, AutomationError> {
    let endpoints = document
        .entry("endpoints")
        .or_insert_with(|| Value::Array(Vec::new()));
    match endpoints {
        Value::Array(list) => Ok(list),
        _ => Err(AutomationError::DefinitionInvalid(vec![Violation::new(
            "endpoints",
            Rule::InvalidType,
            "must be an array",
        )])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::HttpMethod;
    use crate::backend::{BackendContext, BackendFactory, DatabaseManager};
    use crate::definitions::FileDefinitionStore;
    use crate::runtime::AuthGate;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// In-memory store whose writes can be made to fail
    #[derive(Debug, Default)]
    struct FlakyStore {
        documents: std::sync::Mutex<HashMap<String, Value>>,
        fail_puts: AtomicBool,
    }

    #[async_trait]
    impl DefinitionStore for FlakyStore {
        fn describe(&self) -> String {
            "flaky".to_string()
        }

        async fn get(&self, id: &str) -> anyhow::Result<Option<Value>> {
            Ok(self.documents.lock().unwrap().get(id).cloned())
        }

        async fn list(&self) -> anyhow::Result<Vec<String>> {
            let mut ids: Vec<_> = self.documents.lock().unwrap().keys().cloned().collect();
            ids.sort();
            Ok(ids)
        }

        async fn put(&self, id: &str, document: &Value) -> anyhow::Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.documents.lock().unwrap().insert(id.to_string(), document.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> anyhow::Result<bool> {
            Ok(self.documents.lock().unwrap().remove(id).is_some())
        }
    }

    fn service_with(store: Arc<dyn DefinitionStore>) -> AutomationService {
        let context = BackendContext {
            database_url: None,
            database_name: "council_db".to_string(),
            timeout: Duration::from_secs(1),
            databases: Arc::new(DatabaseManager::new("data".to_string())),
        };
        let engine = AutomationEngine::new(
            Arc::new(BackendFactory::with_builtin(context)),
            Arc::new(AuthGate::disabled()),
        );
        AutomationService::new(store, Arc::new(AutomationRegistry::new()), Arc::new(engine))
    }

    fn notes(id: &str, base_path: &str) -> Value {
        json!({
            "id": id,
            "name": "Notes",
            "base_path": base_path,
            "status": "active",
            "endpoints": [{"id": "list", "path": "/", "method": "GET"}],
            "db_config": {"type": "memory", "collection_name": "notes"}
        })
    }

    #[tokio::test]
    async fn create_stamps_persists_and_routes() {
        let store = Arc::new(FlakyStore::default());
        let service = service_with(store.clone());

        let document = service.create(notes("notes", "/notes")).await.unwrap();
        assert!(document["created_at"].is_string());
        assert_eq!(document["created_at"], document["updated_at"]);
        assert!(store.get("notes").await.unwrap().is_some());
        assert!(service.registry().resolve(HttpMethod::Get, "/notes").is_some());

        let err = service.create(notes("notes", "/other")).await.unwrap_err();
        assert_eq!(err.kind(), "already_exists");
    }

    #[tokio::test]
    async fn create_rejects_invalid_and_unstorable_documents() {
        let service = service_with(Arc::new(FlakyStore::default()));
        let err = service.create(json!({"id": "x"})).await.unwrap_err();
        assert_eq!(err.kind(), "definition_invalid");

        let err = service.create(notes("../x", "/x")).await.unwrap_err();
        assert_eq!(err.violations()[0].field, "id");
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn failed_persist_rolls_back_create() {
        let store = Arc::new(FlakyStore::default());
        store.fail_puts.store(true, Ordering::SeqCst);
        let service = service_with(store);

        let err = service.create(notes("notes", "/notes")).await.unwrap_err();
        assert_eq!(err.kind(), "internal_error");
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn failed_persist_restores_previous_version() {
        let store = Arc::new(FlakyStore::default());
        let service = service_with(store.clone());
        service.create(notes("notes", "/notes")).await.unwrap();

        store.fail_puts.store(true, Ordering::SeqCst);
        assert!(service.update("notes", notes("notes", "/v2/notes")).await.is_err());
        assert!(service.registry().resolve(HttpMethod::Get, "/notes").is_some());
        assert!(service.registry().resolve(HttpMethod::Get, "/v2/notes").is_none());
    }

    #[tokio::test]
    async fn update_keeps_identity_and_creation_time() {
        let service = service_with(Arc::new(FlakyStore::default()));
        let created = service.create(notes("notes", "/notes")).await.unwrap();

        let mut body = notes("ignored", "/v2/notes");
        body["created_at"] = json!("1999-01-01T00:00:00Z");
        let updated = service.update("notes", body).await.unwrap();
        assert_eq!(updated["id"], "notes");
        assert_eq!(updated["created_at"], created["created_at"]);
        assert!(service.registry().resolve(HttpMethod::Get, "/v2/notes").is_some());

        let err = service.update("ghost", notes("ghost", "/ghost")).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn update_merges_partial_changes() {
        let service = service_with(Arc::new(FlakyStore::default()));
        service.create(notes("notes", "/notes")).await.unwrap();

        let updated = service
            .update("notes", json!({"description": "Team notes", "owner": "ops"}))
            .await
            .unwrap();
        assert_eq!(updated["description"], "Team notes");
        assert_eq!(updated["name"], "Notes");
        assert_eq!(updated["base_path"], "/notes");
        assert_eq!(updated["metadata"]["owner"], "ops");
        assert_eq!(updated["endpoints"].as_array().unwrap().len(), 1);
        assert!(service.registry().resolve(HttpMethod::Get, "/notes").is_some());

        let err = service.update("notes", json!({"base_path": "no-slash"})).await.unwrap_err();
        assert_eq!(err.kind(), "definition_invalid");
        assert_eq!(service.get_document("notes").await.unwrap()["base_path"], "/notes");
    }

    #[tokio::test]
    async fn create_fills_defaults_from_the_name() {
        let store = Arc::new(FlakyStore::default());
        let service = service_with(store.clone());

        let created = service
            .create(json!({"name": "invoices", "description": "Billing", "tags": ["finance"]}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(created["base_path"], "/api/invoices");
        assert_eq!(created["status"], "draft");
        assert_eq!(created["db_config"]["type"], "memory");
        assert_eq!(created["db_config"]["collection_name"], "invoices");
        assert_eq!(created["metadata"]["tags"], json!(["finance"]));
        assert!(created.get("tags").is_none());
        assert!(store.get(id).await.unwrap().is_some());

        assert_eq!(collection_name_for("Sales Orders"), "sales_orders");
        assert_eq!(collection_name_for("2024"), "_2024");
    }

    #[tokio::test]
    async fn activation_toggles_routing() {
        let service = service_with(Arc::new(FlakyStore::default()));
        service.create(notes("notes", "/notes")).await.unwrap();

        let document = service.deactivate("notes").await.unwrap();
        assert_eq!(document["status"], "inactive");
        assert!(service.registry().resolve(HttpMethod::Get, "/notes").is_none());

        service.activate("notes").await.unwrap();
        assert!(service.registry().resolve(HttpMethod::Get, "/notes").is_some());
    }

    #[tokio::test]
    async fn activation_checks_route_conflicts() {
        let service = service_with(Arc::new(FlakyStore::default()));
        service.create(notes("a", "/notes")).await.unwrap();
        let mut draft = notes("b", "/notes");
        draft["status"] = json!("draft");
        service.create(draft).await.unwrap();

        let err = service.activate("b").await.unwrap_err();
        assert_eq!(err.kind(), "route_conflict");
        assert_eq!(service.list(Some(AutomationStatus::Draft), 0, 20).total, 1);
    }

    #[tokio::test]
    async fn endpoint_edits() {
        let service = service_with(Arc::new(FlakyStore::default()));
        service.create(notes("notes", "/notes")).await.unwrap();

        let document = service
            .add_endpoint("notes", json!({"path": "/", "method": "POST"}))
            .await
            .unwrap();
        let generated = document["endpoints"][1]["id"].as_str().unwrap().to_string();
        assert!(Uuid::parse_str(&generated).is_ok());
        assert!(service.registry().resolve(HttpMethod::Post, "/notes").is_some());

        service
            .update_endpoint("notes", &generated, json!({"path": "/bulk", "method": "POST"}))
            .await
            .unwrap();
        assert!(service.registry().resolve(HttpMethod::Post, "/notes/bulk").is_some());

        service.remove_endpoint("notes", &generated).await.unwrap();
        assert!(service.registry().resolve(HttpMethod::Post, "/notes/bulk").is_none());

        let err = service.remove_endpoint("notes", "missing").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        // A broken edit is rejected and leaves the automation alone
        let err = service
            .add_endpoint("notes", json!({"path": "no-slash", "method": "GET"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "definition_invalid");
        let live = service.registry().get("notes").unwrap();
        assert_eq!(live.compiled().endpoints.len(), 1);
    }

    #[tokio::test]
    async fn load_all_skips_broken_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDefinitionStore::new(dir.path());
        store.put("notes", &notes("notes", "/notes")).await.unwrap();
        store.put("broken", &json!({"id": "broken"})).await.unwrap();
        store.put("clash", &notes("clash", "/notes")).await.unwrap();
        store.put("liar", &notes("someone-else", "/liar")).await.unwrap();

        let service = service_with(Arc::new(store));
        let report = service.load_all().await.unwrap();
        // Files list alphabetically: broken, clash, liar, notes
        assert_eq!(report.loaded, vec!["clash"]);
        let failed: Vec<_> = report.failed.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, vec!["broken", "liar", "notes"]);
    }

    #[tokio::test]
    async fn reload_follows_the_store() {
        let store = Arc::new(FlakyStore::default());
        let service = service_with(store.clone());
        service.create(notes("notes", "/notes")).await.unwrap();
        service.create(notes("keep", "/keep")).await.unwrap();

        store.put("notes", &notes("notes", "/moved")).await.unwrap();
        assert_eq!(service.reload("notes").await.unwrap(), ReloadOutcome::Installed);
        assert!(service.registry().resolve(HttpMethod::Get, "/moved").is_some());

        store.delete("notes").await.unwrap();
        assert_eq!(service.reload("notes").await.unwrap(), ReloadOutcome::Removed);
        assert_eq!(service.reload("notes").await.unwrap_err().kind(), "not_found");

        store.delete("keep").await.unwrap();
        store.put("fresh", &notes("fresh", "/fresh")).await.unwrap();
        let report = service.reload_all().await.unwrap();
        assert_eq!(report.loaded, vec!["fresh"]);
        assert_eq!(report.removed, vec!["keep"]);
    }

    #[tokio::test]
    async fn delete_and_listing() {
        let service = service_with(Arc::new(FlakyStore::default()));
        for i in 0..5 {
            service.create(notes(&format!("n{i}"), &format!("/n{i}"))).await.unwrap();
        }

        let page = service.list(None, 1, 2);
        assert_eq!(page.total, 5);
        let ids: Vec<_> = page.items.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert_eq!(service.list(None, 0, 0).limit, 1);
        assert_eq!(service.list(None, 0, 500).limit, MAX_PAGE_LIMIT);

        service.delete("n0").await.unwrap();
        assert_eq!(service.delete("n0").await.unwrap_err().kind(), "not_found");
        assert_eq!(service.get_document("n0").await.unwrap_err().kind(), "not_found");
        assert_eq!(service.get_document("n1").await.unwrap()["id"], "n1");
    }
}
