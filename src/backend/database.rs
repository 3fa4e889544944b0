/// Shared SQLite connection pools
///
/// Automations bound to the same database share one pool. Pools are created on
/// first use and cached by connection URL; database files are created on
/// demand under the configured data directory.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;

/// Connection pool cache keyed by SQLite URL
#[derive(Debug)]
pub struct DatabaseManager {
    pools: RwLock<HashMap<String, SqlitePool>>,
    /// Base directory for database files named by `db_config.config.database`
    data_dir: String,
    acquire_timeout: Duration,
}

impl DatabaseManager {
    pub fn new(data_dir: String) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            data_dir,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// URL of the file-backed database called `name` inside the data directory
    pub fn database_url(&self, name: &str) -> String {
        let path = Path::new(&self.data_dir).join(format!("{name}.db"));
        format!("sqlite://{}", path.display())
    }

    /// Get or create the pool for a SQLite URL
    ///
    /// Read lock first for the common case, then double-checked under the write lock.
    pub async fn get_pool(&self, url: &str) -> Result<SqlitePool> {
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(url) {
                return Ok(pool.clone());
            }
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(url) {
            return Ok(pool.clone());
        }

        if !url.starts_with("sqlite:") {
            anyhow::bail!("Unsupported database URL '{url}': expected a sqlite: URL");
        }

        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid SQLite URL '{url}'"))?
            .create_if_missing(true);

        let in_memory = is_in_memory(url);
        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory '{}'", parent.display())
                    })?;
                }
            }
        }

        tracing::info!("🗄️ Creating database pool: {}", url);

        // An in-memory database lives exactly as long as its one connection
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .acquire_timeout(self.acquire_timeout)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database '{url}'"))?;

        pools.insert(url.to_string(), pool.clone());
        tracing::info!("✅ Database pool ready: {}", url);

        Ok(pool)
    }

    /// Number of cached pools
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Close every pool; used on shutdown
    pub async fn close_all(&self) {
        let pools: Vec<SqlitePool> = self.pools.write().await.drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await;
        }
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
