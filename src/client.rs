use crate::error::{RestError, Result};
use reqwest::{Client, ClientBuilder};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use url::Url;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Create the default HTTP client for REST API requests
/// with optimized settings for connection pooling and timeouts.
///
/// The per-request timeout is applied on each request, not here.
pub fn create_rest_client() -> Result<Client> {
    ClientBuilder::new()
        .pool_max_idle_per_host(50)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(RestError::from)
}

/// Configuration for REST API client
#[derive(Debug, Clone)]
pub struct Config {
    /// URL scheme (http or https)
    pub scheme: String,
    /// API host, with port if any
    pub host: String,
    /// Path prefix prepended to every call path
    pub base_path: String,
    /// Timeout applied to every request
    pub timeout: Duration,
    /// When false, GET requests carry a `_` timestamp to defeat intermediary caches
    pub cache: bool,
    /// Unwrap the older `{data: ...}` response envelope
    pub legacy: bool,
    /// Headers sent with every request
    pub default_headers: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scheme: "https".to_string(),
            host: "localhost".to_string(),
            base_path: String::new(),
            timeout: DEFAULT_TIMEOUT,
            cache: true,
            legacy: false,
            default_headers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Create a new configuration with the given scheme and host
    pub fn new(scheme: String, host: String) -> Self {
        Config {
            scheme,
            host,
            ..Config::default()
        }
    }

    /// Build a configuration from a full base URL such as `https://api.example.com/api/v1`
    pub fn from_url(base: &str) -> Result<Self> {
        let url = Url::parse(base)?;
        let host = url
            .host_str()
            .ok_or_else(|| RestError::Other(format!("base URL has no host: {}", base)))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Config {
            scheme: url.scheme().to_string(),
            host,
            base_path: url.path().trim_end_matches('/').to_string(),
            ..Config::default()
        })
    }

    /// Read the base URL from the environment.
    ///
    /// `API_URL` is used unless `APP_ENV=development` and `MOCK_API=yes`, in which
    /// case `API_URL_MOCK` points at the local mock backend. Falls back to the
    /// defaults when no URL is set.
    pub fn from_env() -> Result<Self> {
        let development = env::var("APP_ENV").map(|v| v == "development").unwrap_or(false);
        let mock = env::var("MOCK_API").map(|v| v == "yes").unwrap_or(false);

        let var = if development && mock { "API_URL_MOCK" } else { "API_URL" };
        match env::var(var) {
            Ok(base) if !base.is_empty() => Config::from_url(&base),
            _ => Ok(Config::default()),
        }
    }

    /// Set the base path
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable intermediary caching of GET requests
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Enable legacy envelope unwrapping
    pub fn with_legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    /// Add a header sent with every request
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Get the base URL for API requests
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.base_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_keeps_port_and_path() {
        let config = Config::from_url("http://127.0.0.1:8080/api/v1/").unwrap();
        assert_eq!(config.scheme, "http");
        assert_eq!(config.host, "127.0.0.1:8080");
        assert_eq!(config.base_path, "/api/v1");
        assert_eq!(config.base_url(), "http://127.0.0.1:8080/api/v1");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeout, Duration::from_millis(60_000));
        assert!(config.cache);
        assert!(!config.legacy);
        assert_eq!(config.base_url(), "https://localhost");
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::new("http".to_string(), "localhost:3000".to_string())
            .with_base_path("/api/v1/")
            .with_cache(false)
            .with_legacy(true)
            .with_default_header("X-Client", "restpipe");
        assert_eq!(config.base_url(), "http://localhost:3000/api/v1");
        assert!(!config.cache);
        assert!(config.legacy);
        assert_eq!(config.default_headers["X-Client"], "restpipe");
    }
}
