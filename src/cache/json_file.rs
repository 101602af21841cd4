use super::{CacheDriver, CacheEntry};
use crate::error::{RestError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Cache storage in a single JSON object file, rewritten on every change
#[derive(Debug)]
pub struct JsonFileDriver {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, CacheEntry>>>,
}

impl JsonFileDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileDriver {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, CacheEntry>> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn flush(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let bytes = serde_json::to_vec(entries)?;
        fs::write(&self.path, bytes).await?;
        Ok(())
    }

    fn not_ready() -> RestError {
        RestError::Storage("json file cache used before ready()".to_string())
    }
}

#[async_trait]
impl CacheDriver for JsonFileDriver {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn ready(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let entries = self.load().await?;
        // make sure the file is writable now rather than on first put
        self.flush(&entries).await?;
        *self.entries.lock().await = Some(entries);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let guard = self.entries.lock().await;
        let entries = guard.as_ref().ok_or_else(Self::not_ready)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let entries = guard.as_mut().ok_or_else(Self::not_ready)?;
        entries.insert(entry.key.clone(), entry);
        self.flush(entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let entries = guard.as_mut().ok_or_else(Self::not_ready)?;
        if entries.remove(key).is_some() {
            self.flush(entries).await?;
        }
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let entries = guard.as_mut().ok_or_else(Self::not_ready)?;
        entries.retain(|key, _| !key.starts_with(prefix));
        self.flush(entries).await
    }
}
