/// Definition stores
///
/// Where automation documents are persisted between restarts. The lifecycle
/// service only sees the [`DefinitionStore`] capability; which implementation
/// backs it is decided once at startup from configuration.

// One `{id}.json` file per automation in a local directory
pub mod file;

// Remote object storage over HTTP
pub mod blob;

// `automations` table in a SQLite database
pub mod sqlite;

use crate::backend::DatabaseManager;
use crate::config::DefinitionsConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

pub use blob::BlobDefinitionStore;
pub use file::FileDefinitionStore;
pub use sqlite::SqliteDefinitionStore;

/// Persistence for raw automation documents, keyed by automation id
#[async_trait]
pub trait DefinitionStore: Send + Sync + Debug {
    /// Human-readable location, for logs
    fn describe(&self) -> String;

    async fn get(&self, id: &str) -> Result<Option<Value>>;

    /// Ids of every stored document
    async fn list(&self) -> Result<Vec<String>>;

    /// Create or overwrite
    async fn put(&self, id: &str, document: &Value) -> Result<()>;

    /// `false` when nothing was stored under `id`
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Pick the store named by configuration: blob, then SQLite, then directory
pub async fn open(config: &DefinitionsConfig, databases: &DatabaseManager) -> Result<Arc<dyn DefinitionStore>> {
    let store: Arc<dyn DefinitionStore> = match (&config.blob_url, &config.blob_token, &config.database_url) {
        (Some(url), Some(token), _) => Arc::new(BlobDefinitionStore::new(url, token)?),
        (_, _, Some(database_url)) => {
            let pool = databases.get_pool(database_url).await?;
            let store = SqliteDefinitionStore::new(pool);
            store.init_schema().await?;
            Arc::new(store)
        }
        _ => Arc::new(FileDefinitionStore::new(&config.directory)),
    };

    tracing::info!("📚 Automation definitions stored in {}", store.describe());
    Ok(store)
}

/// Ids become file names and object keys, so only a conservative alphabet is accepted
pub(crate) fn ensure_storable_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        anyhow::bail!("Automation id '{}' cannot be used as a storage key", id);
    }
    Ok(())
}
