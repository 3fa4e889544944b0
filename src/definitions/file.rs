//! Directory-backed definition store: `{dir}/{id}.json`, pretty-printed.

use super::{ensure_storable_id, DefinitionStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileDefinitionStore {
    dir: PathBuf,
}

impl FileDefinitionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        ensure_storable_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }

    async fn get(&self, id: &str) -> Result<Option<Value>> {
        let path = self.path_for(id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let document = serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))?;
        Ok(Some(document))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", self.dir.display())),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if ensure_storable_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn put(&self, id: &str, document: &Value) -> Result<()> {
        let path = self.path_for(id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        // Write-then-rename so a crash never leaves a truncated definition behind
        let tmp = self.dir.join(format!(".{id}.json.tmp"));
        let body = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move definition into {}", path.display()))?;

        tracing::debug!("💾 Saved automation definition {} to {}", id, path.display());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}
