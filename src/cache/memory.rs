use super::{CacheDriver, CacheEntry};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Process-lifetime cache storage
#[derive(Debug, Default)]
pub struct MemoryDriver {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<()> {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
