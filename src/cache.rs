//! Response cache over a prioritized chain of storage drivers.
//!
//! Only GET requests whose URL matches one of the include patterns are cached,
//! and with no patterns nothing is. Entries expire after their TTL and are
//! dropped when next read; nothing else invalidates them.

pub mod directory;
pub mod json_file;
pub mod memory;

use crate::error::{RestError, Result};
use crate::request::RequestDescriptor;
use crate::transport::TransportResponse;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub use directory::DirectoryDriver;
pub use json_file::JsonFileDriver;
pub use memory::MemoryDriver;

/// Lifetime of an entry unless configured otherwise
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_NAMESPACE: &str = "lf-cache";

/// One stored response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Namespaced key
    pub key: String,
    pub response: TransportResponse,
    pub inserted_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: String, response: TransportResponse, ttl: Duration) -> Self {
        CacheEntry {
            key,
            response,
            inserted_at: Utc::now(),
            ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now >= self.inserted_at + ttl,
            Err(_) => false,
        }
    }
}

/// Async key/value backend of the cache
#[async_trait]
pub trait CacheDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the backend. A driver failing here is skipped.
    async fn ready(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn set(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`
    async fn clear(&self, prefix: &str) -> Result<()>;
}

/// Cache of successful GET responses
pub struct ResponseCache {
    drivers: Vec<Arc<dyn CacheDriver>>,
    active: OnceCell<Option<Arc<dyn CacheDriver>>>,
    include: Vec<Regex>,
    ttl: Duration,
    namespace: String,
}

impl Default for ResponseCache {
    fn default() -> Self {
        let memory: Arc<dyn CacheDriver> = Arc::new(MemoryDriver::new());
        ResponseCache {
            drivers: vec![memory],
            active: OnceCell::new(),
            include: Vec::new(),
            ttl: DEFAULT_TTL,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl ResponseCache {
    /// In-memory cache that includes nothing until patterns are added
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the driver chain, highest priority first
    pub fn with_drivers(mut self, drivers: Vec<Arc<dyn CacheDriver>>) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Cache GET requests whose URL matches `pattern`
    pub fn include(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| RestError::Configuration(format!("invalid cache pattern {}: {}", pattern, e)))?;
        self.include.push(regex);
        Ok(self)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn should_cache(&self, request: &RequestDescriptor) -> bool {
        request.method == Method::GET && self.include.iter().any(|re| re.is_match(&request.url))
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Driver in use; picked on first access and kept for the cache's lifetime
    async fn driver(&self) -> Option<&Arc<dyn CacheDriver>> {
        self.active
            .get_or_init(|| async {
                for driver in &self.drivers {
                    match driver.ready().await {
                        Ok(()) => {
                            info!(driver = driver.name(), "cache driver selected");
                            return Some(driver.clone());
                        }
                        Err(e) => warn!(driver = driver.name(), error = %e, "cache driver unavailable"),
                    }
                }
                warn!("no cache driver available, caching disabled");
                None
            })
            .await
            .as_ref()
    }

    /// Name of the driver in use, if any became ready
    pub async fn active_driver(&self) -> Option<String> {
        self.driver().await.map(|d| d.name().to_string())
    }

    /// Fresh cached response for `key`
    pub async fn get(&self, key: &str) -> Result<Option<TransportResponse>> {
        let Some(driver) = self.driver().await else {
            return Ok(None);
        };
        let key = self.namespaced(key);
        match driver.get(&key).await? {
            Some(entry) if entry.is_expired(Utc::now()) => {
                debug!(key = %key, "cache entry expired");
                driver.remove(&key).await?;
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.response)),
            None => Ok(None),
        }
    }

    /// Store a response under `key` with the cache TTL
    pub async fn put(&self, key: &str, response: &TransportResponse) -> Result<()> {
        self.put_with_ttl(key, response, self.ttl).await
    }

    pub async fn put_with_ttl(&self, key: &str, response: &TransportResponse, ttl: Duration) -> Result<()> {
        let Some(driver) = self.driver().await else {
            return Ok(());
        };
        driver
            .set(CacheEntry::new(self.namespaced(key), response.clone(), ttl))
            .await
    }

    /// Drop every entry of this cache's namespace
    pub async fn clear(&self) -> Result<()> {
        let Some(driver) = self.driver().await else {
            return Ok(());
        };
        driver.clear(&format!("{}:", self.namespace)).await
    }
}
