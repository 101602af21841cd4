//! Authentication adapters and the runtime adapter registry.
//!
//! Call sites name the schemes they need (`"OAuth2"`, `"basicAuth"`, ...). Each
//! name maps to an [`AuthScheme`], and each scheme kind maps to the adapter
//! currently registered for it. Both tables are re-read on every call, so
//! adapters may be replaced at any time.

use crate::driver::{ParsedTokens, RefreshOutcome, TokenDriver, DEFAULT_MIN_VALIDITY};
use crate::error::{RestError, Result};
use crate::request::RequestDescriptor;
use crate::token::Credential;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the scheme every client starts with
pub const DEFAULT_SCHEME: &str = "OAuth2";

/// Kind of authentication scheme; adapters are registered per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    Basic,
    ApiKey,
    OAuth2,
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthKind::Basic => "basic",
            AuthKind::ApiKey => "apiKey",
            AuthKind::OAuth2 => "oauth2",
        })
    }
}

/// Where an API key travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Scheme-specific configuration
#[derive(Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        /// Header or query parameter name
        name: String,
        location: ApiKeyLocation,
        key: String,
        /// Written before the key, separated by a space (e.g. `Token`)
        prefix: Option<String>,
    },
    OAuth2 {
        /// Fixed token used instead of the driver's credential
        access_token: Option<String>,
    },
}

impl AuthScheme {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        AuthScheme::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn api_key(name: impl Into<String>, location: ApiKeyLocation, key: impl Into<String>) -> Self {
        AuthScheme::ApiKey {
            name: name.into(),
            location,
            key: key.into(),
            prefix: None,
        }
    }

    pub fn oauth2() -> Self {
        AuthScheme::OAuth2 { access_token: None }
    }

    /// OAuth2 scheme pinned to a fixed token
    pub fn oauth2_with_token(access_token: impl Into<String>) -> Self {
        AuthScheme::OAuth2 {
            access_token: Some(access_token.into()),
        }
    }

    /// Set the API key prefix; no effect on other schemes
    pub fn with_prefix(mut self, new_prefix: impl Into<String>) -> Self {
        if let AuthScheme::ApiKey { ref mut prefix, .. } = self {
            *prefix = Some(new_prefix.into());
        }
        self
    }

    pub fn kind(&self) -> AuthKind {
        match self {
            AuthScheme::Basic { .. } => AuthKind::Basic,
            AuthScheme::ApiKey { .. } => AuthKind::ApiKey,
            AuthScheme::OAuth2 { .. } => AuthKind::OAuth2,
        }
    }
}

// Secrets stay out of logs
impl fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScheme::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthScheme::ApiKey {
                name,
                location,
                prefix,
                ..
            } => f
                .debug_struct("ApiKey")
                .field("name", name)
                .field("location", location)
                .field("key", &"<redacted>")
                .field("prefix", prefix)
                .finish(),
            AuthScheme::OAuth2 { access_token } => f
                .debug_struct("OAuth2")
                .field("access_token", &access_token.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Refresh capability of an adapter
#[async_trait]
pub trait RefreshCapable: Send + Sync {
    async fn refresh_token_if_expired(&self) -> Result<RefreshOutcome>;
}

/// Produces authentication for one kind of scheme
#[async_trait]
pub trait AuthAdapter: Send + Sync {
    /// Scheme kind this adapter can apply
    fn kind(&self) -> AuthKind;

    /// Run the login flow of the scheme, if it has one
    async fn authenticate(&self) -> Result<Credential>;

    /// Write authentication into the request. Never suspends.
    fn apply_auth_to_request(&self, scheme: &AuthScheme, request: &mut RequestDescriptor) -> Result<()>;

    /// Refresh capability, for adapters whose credential expires
    fn refresher(&self) -> Option<&dyn RefreshCapable> {
        None
    }
}

fn mismatch(adapter: AuthKind, scheme: &AuthScheme) -> RestError {
    RestError::Configuration(format!(
        "{} adapter cannot apply a {} scheme",
        adapter,
        scheme.kind()
    ))
}

/// `Authorization: Basic` from static credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicAuthAdapter;

#[async_trait]
impl AuthAdapter for BasicAuthAdapter {
    fn kind(&self) -> AuthKind {
        AuthKind::Basic
    }

    /// Basic credentials are static; there is nothing to log in to.
    async fn authenticate(&self) -> Result<Credential> {
        Ok(Credential::default())
    }

    fn apply_auth_to_request(&self, scheme: &AuthScheme, request: &mut RequestDescriptor) -> Result<()> {
        let AuthScheme::Basic { username, password } = scheme else {
            return Err(mismatch(self.kind(), scheme));
        };
        let encoded = STANDARD.encode(format!("{}:{}", username, password));
        request.set_header("Authorization", format!("Basic {}", encoded));
        Ok(())
    }
}

/// Static API key in a header or query parameter
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyAuthAdapter;

#[async_trait]
impl AuthAdapter for ApiKeyAuthAdapter {
    fn kind(&self) -> AuthKind {
        AuthKind::ApiKey
    }

    async fn authenticate(&self) -> Result<Credential> {
        Ok(Credential::default())
    }

    fn apply_auth_to_request(&self, scheme: &AuthScheme, request: &mut RequestDescriptor) -> Result<()> {
        let AuthScheme::ApiKey {
            name,
            location,
            key,
            prefix,
        } = scheme
        else {
            return Err(mismatch(self.kind(), scheme));
        };

        let value = match prefix {
            Some(prefix) => format!("{} {}", prefix, key),
            None => key.clone(),
        };
        match location {
            ApiKeyLocation::Header => request.set_header(name, value),
            ApiKeyLocation::Query => {
                request.query_params.insert(name.clone(), value);
            }
        }
        Ok(())
    }
}

/// Bearer tokens from a [`TokenDriver`].
///
/// The adapter never copies the credential; every request reads the driver's
/// stored tokens.
pub struct OAuth2AuthAdapter {
    driver: Arc<dyn TokenDriver>,
    min_validity: i64,
}

impl OAuth2AuthAdapter {
    pub fn new(driver: Arc<dyn TokenDriver>) -> Self {
        OAuth2AuthAdapter {
            driver,
            min_validity: DEFAULT_MIN_VALIDITY,
        }
    }

    /// Seconds of validity under which the token is refreshed before a request
    pub fn with_min_validity(mut self, seconds: i64) -> Self {
        self.min_validity = seconds;
        self
    }

    pub fn driver(&self) -> &Arc<dyn TokenDriver> {
        &self.driver
    }

    pub fn set_tokens(&self, credential: &Credential) {
        self.driver.set_stored_tokens(credential);
    }

    pub fn get_tokens(&self) -> Credential {
        self.driver.get_stored_tokens()
    }

    pub fn get_parsed_tokens(&self) -> ParsedTokens {
        self.driver.get_parsed_tokens()
    }

    pub fn clear_tokens(&self) {
        self.driver.clear_stored_tokens();
    }
}

#[async_trait]
impl AuthAdapter for OAuth2AuthAdapter {
    fn kind(&self) -> AuthKind {
        AuthKind::OAuth2
    }

    async fn authenticate(&self) -> Result<Credential> {
        self.driver.authenticate().await
    }

    fn apply_auth_to_request(&self, scheme: &AuthScheme, request: &mut RequestDescriptor) -> Result<()> {
        let AuthScheme::OAuth2 { access_token } = scheme else {
            return Err(mismatch(self.kind(), scheme));
        };
        let token = match access_token {
            Some(token) => token.clone(),
            None => self.driver.get_stored_tokens().access_token,
        };
        request.set_header("Authorization", format!("Bearer {}", token));
        Ok(())
    }

    fn refresher(&self) -> Option<&dyn RefreshCapable> {
        Some(self)
    }
}

#[async_trait]
impl RefreshCapable for OAuth2AuthAdapter {
    async fn refresh_token_if_expired(&self) -> Result<RefreshOutcome> {
        self.driver.refresh_token_if_expired(self.min_validity).await
    }
}

/// Runtime tables of named schemes and per-kind adapters
pub struct AuthRegistry {
    schemes: DashMap<String, AuthScheme>,
    adapters: DashMap<AuthKind, Arc<dyn AuthAdapter>>,
}

impl Default for AuthRegistry {
    fn default() -> Self {
        let registry = AuthRegistry {
            schemes: DashMap::new(),
            adapters: DashMap::new(),
        };
        registry.define_scheme(DEFAULT_SCHEME, AuthScheme::oauth2());
        registry
    }
}

impl AuthRegistry {
    /// Registry with the default `OAuth2` scheme and no adapters
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or replace a named scheme
    pub fn define_scheme(&self, name: impl Into<String>, scheme: AuthScheme) {
        self.schemes.insert(name.into(), scheme);
    }

    pub fn scheme(&self, name: &str) -> Option<AuthScheme> {
        self.schemes.get(name).map(|s| s.value().clone())
    }

    /// Register or replace the adapter serving `kind`
    pub fn register(&self, kind: AuthKind, adapter: Arc<dyn AuthAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn get(&self, kind: AuthKind) -> Option<Arc<dyn AuthAdapter>> {
        self.adapters.get(&kind).map(|a| a.value().clone())
    }

    pub fn has(&self, kind: AuthKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn remove(&self, kind: AuthKind) -> Option<Arc<dyn AuthAdapter>> {
        self.adapters.remove(&kind).map(|(_, a)| a)
    }

    /// Scheme and adapter for a scheme name.
    ///
    /// Unknown names, kinds without an adapter, and adapters registered under a
    /// kind they cannot serve are configuration errors.
    pub fn resolve(&self, name: &str) -> Result<(AuthScheme, Arc<dyn AuthAdapter>)> {
        let scheme = self
            .scheme(name)
            .ok_or_else(|| RestError::Configuration(format!("unknown authentication scheme: {}", name)))?;
        let kind = scheme.kind();
        let adapter = self.get(kind).ok_or_else(|| {
            RestError::Configuration(format!("no {} adapter registered for scheme {}", kind, name))
        })?;
        if adapter.kind() != kind {
            return Err(RestError::Configuration(format!(
                "adapter registered for {} is a {} adapter",
                kind,
                adapter.kind()
            )));
        }
        Ok((scheme, adapter))
    }

    /// Log in through the adapter serving a scheme name
    pub async fn authenticate(&self, name: &str) -> Result<Credential> {
        let (_, adapter) = self.resolve(name)?;
        adapter.authenticate().await
    }
}
