//! Key-value storage adapters.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::{errors::Error, ports::Storage, Result};

/// Storage keys shared by the state mutators.
pub mod keys {
    use crate::domain::ProductId;

    pub const TICKER_TEXT: &str = "ticker_text";
    pub const PAYMENT_CARD: &str = "payment_card";
    pub const CATALOG_INDEX: &str = "catalog_index";
    pub const CHAT_HISTORY: &str = "chat_history";
    pub const REMOTE_CONFIG: &str = "remote_config";

    pub fn product(id: ProductId) -> String {
        format!("product:{id}")
    }
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.inner.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.lock().await.remove(key);
        Ok(())
    }
}

/// Whole-document JSON storage on disk.
///
/// Every write rewrites the file through a sibling temp file and a rename, so a
/// crash never leaves a half-written document behind. A failed write keeps the
/// in-memory value.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    inner: Mutex<Map<String, Value>>,
}

impl JsonFileStorage {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(txt) if txt.trim().is_empty() => Map::new(),
            Ok(txt) => match serde_json::from_str::<Value>(&txt)? {
                Value::Object(map) => map,
                _ => {
                    return Err(Error::Storage(format!(
                        "{} does not contain a JSON object",
                        path.display()
                    )))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            inner: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, doc: &Map<String, Value>) -> Result<()> {
        let body = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::Storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("rename to {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut doc = self.inner.lock().await;
        doc.insert(key.to_string(), value);
        self.persist(&doc).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut doc = self.inner.lock().await;
        if doc.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tmp_path(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("{prefix}-{}-{ts}.json", std::process::id()))
    }

    #[tokio::test]
    async fn memory_storage_roundtrip() {
        let s = MemoryStorage::new();
        s.set("a", json!(1)).await.unwrap();
        assert_eq!(s.get("a").await.unwrap(), Some(json!(1)));
        s.remove("a").await.unwrap();
        assert_eq!(s.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_file_storage_survives_reopen() {
        let path = tmp_path("vitrina-storage");
        {
            let s = JsonFileStorage::open(&path).await.unwrap();
            s.set(keys::TICKER_TEXT, json!("Ofertas")).await.unwrap();
            s.set(&keys::product(1), json!({"id": 1})).await.unwrap();
            s.remove(&keys::product(1)).await.unwrap();
        }

        let reopened = JsonFileStorage::open(&path).await.unwrap();
        assert_eq!(
            reopened.get(keys::TICKER_TEXT).await.unwrap(),
            Some(json!("Ofertas"))
        );
        assert_eq!(reopened.get(&keys::product(1)).await.unwrap(), None);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn json_file_storage_rejects_non_object_document() {
        let path = tmp_path("vitrina-storage-bad");
        std::fs::write(&path, "[1,2,3]").unwrap();
        let err = JsonFileStorage::open(&path).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        let _ = std::fs::remove_file(path);
    }
}
