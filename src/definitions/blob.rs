//! Remote blob definition store.
//!
//! Documents live at `{base}/automations/{id}.json`. Every request carries the
//! read/write token as a bearer credential. Listing is paged:
//! `GET {base}/?prefix=automations/&cursor=..` answers
//! `{"blobs": [{"pathname": "automations/tasks.json"}], "cursor": "..", "hasMore": true}`.

use super::{ensure_storable_id, DefinitionStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

const PREFIX: &str = "automations/";

pub struct BlobDefinitionStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for BlobDefinitionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobDefinitionStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    blobs: Vec<BlobEntry>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default, rename = "hasMore")]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct BlobEntry {
    pathname: String,
}

impl BlobDefinitionStore {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create blob store HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn object_url(&self, id: &str) -> Result<String> {
        ensure_storable_id(id)?;
        Ok(format!("{}/{PREFIX}{id}.json", self.base_url))
    }
}

/// `automations/tasks.json` -> `tasks`
fn id_from_pathname(pathname: &str) -> Option<&str> {
    let id = pathname.strip_prefix(PREFIX)?.strip_suffix(".json")?;
    ensure_storable_id(id).ok().map(|_| id)
}

#[async_trait]
impl DefinitionStore for BlobDefinitionStore {
    fn describe(&self) -> String {
        format!("blob store {}", self.base_url)
    }

    async fn get(&self, id: &str) -> Result<Option<Value>> {
        let url = self.object_url(id)?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status().with_context(|| format!("GET {url} failed"))?;
        let document = response
            .json::<Value>()
            .await
            .with_context(|| format!("Invalid JSON at {url}"))?;
        Ok(Some(document))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let list_url = format!("{}/", self.base_url);
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&list_url)
                .bearer_auth(&self.token)
                .query(&[("prefix", PREFIX)]);
            if let Some(cursor) = &cursor {
                request = request.query(&[("cursor", cursor.as_str())]);
            }

            let page: ListPage = request
                .send()
                .await
                .context("Listing blob store failed")?
                .error_for_status()
                .context("Listing blob store failed")?
                .json()
                .await
                .context("Invalid blob listing")?;

            ids.extend(page.blobs.iter().filter_map(|b| id_from_pathname(&b.pathname)).map(String::from));

            match page.cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn put(&self, id: &str, document: &Value) -> Result<()> {
        let url = self.object_url(id)?;
        self.client
            .put(&url)
            .bearer_auth(&self.token)
            .json(document)
            .send()
            .await
            .with_context(|| format!("PUT {url} failed"))?
            .error_for_status()
            .with_context(|| format!("PUT {url} failed"))?;

        tracing::debug!("☁️ Saved automation definition {} to {}", id, url);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let url = self.object_url(id)?;
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("DELETE {url} failed"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status().with_context(|| format!("DELETE {url} failed"))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pathnames_map_to_ids() {
        assert_eq!(id_from_pathname("automations/tasks.json"), Some("tasks"));
        assert_eq!(id_from_pathname("automations/tasks.txt"), None);
        assert_eq!(id_from_pathname("other/tasks.json"), None);
        assert_eq!(id_from_pathname("automations/a/b.json"), None);
    }

    #[test]
    fn object_urls_trim_the_base() {
        let store = BlobDefinitionStore::new("https://blob.example/", "t").unwrap();
        assert_eq!(store.object_url("tasks").unwrap(), "https://blob.example/automations/tasks.json");
        assert!(store.object_url("../x").is_err());
        assert!(!format!("{store:?}").contains("token"));
    }
}
