//! # restpipe - authenticated, caching REST request pipeline
//!
//! An async client core for JSON REST backends. Every call goes through the
//! same pipeline: URL and parameter encoding, an authentication pre-flight that
//! refreshes expiring tokens, an optional response cache, response
//! classification, and conversion of the body into the requested shape.
//!
//! ## Features
//!
//! - Pluggable authentication adapters registered at runtime:
//!   - HTTP Basic
//!   - API keys in a header or query parameter
//!   - OAuth2 bearer tokens from an identity-provider driver (Keycloak, or a
//!     deterministic mock for tests) with refresh before dispatch
//! - Response cache over a chain of storage drivers (memory, one file per
//!   entry, single JSON file) with an allow-list of cacheable URLs
//! - Total type conversion of response bodies (scalars, lists, maps, models)
//! - Optional unwrapping of legacy `{"data": ...}` envelopes
//!
//! ## Basic Usage
//!
//! ```no_run
//! use restpipe::{ApiCall, ApiClient, Config, Target};
//!
//! # async fn run() -> restpipe::Result<()> {
//! let client = ApiClient::new(Config::from_url("https://api.example.com/v1")?)?;
//!
//! let count = client
//!     .execute(ApiCall::get("/users/{id}/count").path_param("id", 42).returns(Target::Integer))
//!     .await?;
//! println!("count: {:?}", count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Authentication
//!
//! ```no_run
//! use restpipe::driver::{KeycloakConfig, KeycloakDriver};
//! use restpipe::storage::MemorySessionStorage;
//! use restpipe::{ApiCall, ApiClient, AuthKind, Config, OAuth2AuthAdapter};
//! use std::sync::Arc;
//!
//! # async fn run() -> restpipe::Result<()> {
//! let client = ApiClient::new(Config::from_env()?)?;
//! let driver = Arc::new(KeycloakDriver::from_config(
//!     KeycloakConfig::from_env(),
//!     Arc::new(MemorySessionStorage::new()),
//! )?);
//! client
//!     .registry()
//!     .register(AuthKind::OAuth2, Arc::new(OAuth2AuthAdapter::new(driver)));
//! client.authenticate("OAuth2").await?;
//!
//! client
//!     .call_api(
//!         ApiCall::get("/me")
//!             .auth("OAuth2")
//!             .on_success(|body| println!("{:?}", body))
//!             .on_error(|err| eprintln!("{}", err)),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod convert;
pub mod driver;
pub mod error;
pub mod request;
pub mod response;
pub mod rest;
pub mod storage;
pub mod time;
pub mod token;
pub mod transport;

// Re-export main types for convenience
pub use auth::{
    ApiKeyAuthAdapter, ApiKeyLocation, AuthAdapter, AuthKind, AuthRegistry, AuthScheme,
    BasicAuthAdapter, OAuth2AuthAdapter,
};
pub use cache::{CacheDriver, ResponseCache};
pub use client::Config;
pub use convert::{convert, Custom, Target};
pub use driver::{MockTokenDriver, TokenDriver};
pub use error::{RestError, Result};
pub use request::{FilePart, RequestDescriptor};
pub use response::ApiResponse;
pub use rest::{ApiCall, ApiClient};
pub use time::Time;
pub use token::Credential;
pub use transport::{Transport, TransportResponse};

// Re-export serde_json for convenience
pub use serde_json::json;
