use super::{CacheDriver, CacheEntry};
use crate::error::{RestError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Durable cache storage with one JSON file per entry.
///
/// Files are named after the SHA-256 of the entry key, so any key is a valid
/// file name.
#[derive(Debug, Clone)]
pub struct DirectoryDriver {
    root: PathBuf,
}

impl DirectoryDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryDriver { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.root.join(format!("{}.json", name))
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheDriver for DirectoryDriver {
    fn name(&self) -> &str {
        "directory"
    }

    async fn ready(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        let metadata = fs::metadata(&self.root).await?;
        if metadata.permissions().readonly() {
            return Err(RestError::Storage(format!(
                "cache directory {} is read-only",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Self::read_entry(&self.path_for(key)).await
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let path = self.path_for(&entry.key);
        let bytes = serde_json::to_vec(&entry)?;
        // write then rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, prefix: &str) -> Result<()> {
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_entry(&path).await {
                Ok(Some(entry)) if entry.key.starts_with(prefix) => {
                    fs::remove_file(&path).await?;
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache file"),
            }
        }
        Ok(())
    }
}
