use super::{InitOutcome, RefreshOutcome, TokenDriver};
use crate::client::create_rest_client;
use crate::error::{RestError, Result};
use crate::storage::{SessionStorage, TokenStore};
use crate::token::{Credential, TokenResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use std::env;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_URL: &str = "http://127.0.0.1:5010/auth";
const DEFAULT_REALM: &str = "master";
const DEFAULT_CLIENT_ID: &str = "public-client";

/// How the client logs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginGrant {
    /// Resource owner password credentials
    Password { username: String, password: String },
    /// Service account of a confidential client
    ClientCredentials,
}

/// Keycloak realm and client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeycloakConfig {
    /// Server URL including the `/auth` prefix when the server uses one
    pub url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub grant: LoginGrant,
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        KeycloakConfig {
            url: DEFAULT_URL.to_string(),
            realm: DEFAULT_REALM.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            grant: LoginGrant::ClientCredentials,
        }
    }
}

impl KeycloakConfig {
    /// Read `KEYCLOAK_URL`, `KEYCLOAK_REALM`, `KEYCLOAK_CLIENT_ID`,
    /// `KEYCLOAK_CLIENT_SECRET`, `KEYCLOAK_USERNAME` and `KEYCLOAK_PASSWORD`.
    /// A username selects the password grant.
    pub fn from_env() -> Self {
        let defaults = KeycloakConfig::default();
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());

        let grant = match var("KEYCLOAK_USERNAME") {
            Some(username) => LoginGrant::Password {
                username,
                password: var("KEYCLOAK_PASSWORD").unwrap_or_default(),
            },
            None => LoginGrant::ClientCredentials,
        };

        KeycloakConfig {
            url: var("KEYCLOAK_URL").unwrap_or(defaults.url),
            realm: var("KEYCLOAK_REALM").unwrap_or(defaults.realm),
            client_id: var("KEYCLOAK_CLIENT_ID").unwrap_or(defaults.client_id),
            client_secret: var("KEYCLOAK_CLIENT_SECRET"),
            grant,
        }
    }

    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.url.trim_end_matches('/'),
            self.realm
        )
    }
}

/// Behavior of [`IdentityProvider::init`] without a usable session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnLoad {
    /// Log in
    #[default]
    LoginRequired,
    /// Report unauthenticated
    CheckSso,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitOptions {
    pub on_load: OnLoad,
    /// Previously stored access token
    pub token: Option<String>,
    /// Previously stored refresh token
    pub refresh_token: Option<String>,
    /// Stored expiry of the access token, for tokens that do not carry one
    pub expires_at: Option<DateTime<Utc>>,
}

/// Client side of an OpenID Connect identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Restore or establish a session; `Ok(true)` when authenticated
    async fn init(&self, options: InitOptions) -> Result<bool>;

    /// Refresh when the token expires within `min_validity` seconds;
    /// `Ok(true)` when a refresh happened
    async fn update_token(&self, min_validity: i64) -> Result<bool>;

    /// Run the login flow
    async fn login(&self) -> Result<()>;

    fn token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    fn id_token(&self) -> Option<String>;
    fn expires_at(&self) -> Option<DateTime<Utc>>;
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Keycloak client talking to the realm's token endpoint
pub struct KeycloakClient {
    config: KeycloakConfig,
    http: Client,
    session: RwLock<Credential>,
}

impl KeycloakClient {
    pub fn new(config: KeycloakConfig) -> Result<Self> {
        Ok(KeycloakClient::with_client(config, create_rest_client()?))
    }

    pub fn with_client(config: KeycloakConfig, http: Client) -> Self {
        KeycloakClient {
            config,
            http,
            session: RwLock::new(Credential::default()),
        }
    }

    pub fn config(&self) -> &KeycloakConfig {
        &self.config
    }

    async fn request_token(&self, mut form: Vec<(&'static str, String)>) -> Result<()> {
        form.push(("client_id", self.config.client_id.clone()));
        if let Some(ref secret) = self.config.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(RestError::IdentityProvider(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&body)?;
        let mut credential = Credential::from_response(&token, Utc::now());
        // Keycloak omits the refresh token on some grants; keep the one we have
        if credential.refresh_token.is_empty() {
            credential.refresh_token = self.session.read().refresh_token.clone();
        }
        *self.session.write() = credential;
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        let refresh_token = self.session.read().refresh_token.clone();
        if refresh_token.is_empty() {
            return Err(RestError::IdentityProvider(
                "no refresh token available and access token has expired".to_string(),
            ));
        }
        self.request_token(vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

#[async_trait]
impl IdentityProvider for KeycloakClient {
    async fn init(&self, options: InitOptions) -> Result<bool> {
        {
            let mut session = self.session.write();
            let restored = Credential::new(
                options.token.unwrap_or_default(),
                options.refresh_token.unwrap_or_default(),
            );
            *session = match options.expires_at {
                Some(at) => restored.with_expiry(at),
                None => restored,
            };
        }

        let restored = self.session.read().clone();
        if !restored.expires_within(0, Utc::now()) {
            return Ok(true);
        }
        if restored.has_refresh_token() {
            match self.refresh().await {
                Ok(()) => return Ok(true),
                Err(e) => debug!(error = %e, "stored refresh token rejected"),
            }
        }

        match options.on_load {
            OnLoad::LoginRequired => {
                self.login().await?;
                Ok(true)
            }
            OnLoad::CheckSso => Ok(false),
        }
    }

    async fn update_token(&self, min_validity: i64) -> Result<bool> {
        let current = self.session.read().clone();
        if !current.has_access_token() && !current.has_refresh_token() {
            return Err(RestError::IdentityProvider("not authenticated".to_string()));
        }
        if !current.expires_within(min_validity, Utc::now()) {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    async fn login(&self) -> Result<()> {
        let form = match self.config.grant {
            LoginGrant::Password {
                ref username,
                ref password,
            } => vec![
                ("grant_type", "password".to_string()),
                ("username", username.clone()),
                ("password", password.clone()),
                ("scope", "openid".to_string()),
            ],
            LoginGrant::ClientCredentials => {
                vec![("grant_type", "client_credentials".to_string())]
            }
        };
        self.request_token(form).await
    }

    fn token(&self) -> Option<String> {
        non_empty(&self.session.read().access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        non_empty(&self.session.read().refresh_token)
    }

    fn id_token(&self) -> Option<String> {
        self.session.read().id_token.clone()
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.session.read().expires_at
    }
}

/// OAuth2 driver for a Keycloak realm.
///
/// Refreshes are serialized: a caller that waited on an in-flight refresh sees
/// the renewed token and does not refresh again.
pub struct KeycloakDriver {
    provider: Arc<dyn IdentityProvider>,
    store: TokenStore,
    refresh_lock: Mutex<()>,
}

impl KeycloakDriver {
    pub const NAME: &'static str = "keycloak";

    pub fn new(provider: Arc<dyn IdentityProvider>, storage: Arc<dyn SessionStorage>) -> Self {
        KeycloakDriver {
            provider,
            store: TokenStore::new(storage, Self::NAME),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Driver over a [`KeycloakClient`] built from `config`
    pub fn from_config(config: KeycloakConfig, storage: Arc<dyn SessionStorage>) -> Result<Self> {
        Ok(KeycloakDriver::new(Arc::new(KeycloakClient::new(config)?), storage))
    }

    fn update_stored_tokens(&self) {
        self.store.set(&self.current());
    }

    /// Session as the provider currently holds it
    fn current(&self) -> Credential {
        Credential {
            access_token: self.provider.token().unwrap_or_default(),
            refresh_token: self.provider.refresh_token().unwrap_or_default(),
            id_token: self.provider.id_token(),
            expires_at: self.provider.expires_at(),
        }
    }
}

#[async_trait]
impl TokenDriver for KeycloakDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> InitOutcome {
        let stored = self.store.get();
        let options = InitOptions {
            on_load: OnLoad::LoginRequired,
            token: non_empty(&stored.access_token),
            refresh_token: non_empty(&stored.refresh_token),
            expires_at: stored.expires_at,
        };

        match self.provider.init(options).await {
            Ok(true) => {
                self.update_stored_tokens();
                info!(driver = Self::NAME, "identity provider authenticated");
                InitOutcome {
                    credential: self.current(),
                    authenticated: true,
                    error: false,
                }
            }
            Ok(false) => {
                warn!(driver = Self::NAME, "identity provider failed to authenticate");
                InitOutcome {
                    credential: self.current(),
                    authenticated: false,
                    error: true,
                }
            }
            Err(e) => {
                warn!(driver = Self::NAME, error = %e, "identity provider failed to authenticate due to an error");
                InitOutcome {
                    credential: self.current(),
                    authenticated: false,
                    error: true,
                }
            }
        }
    }

    async fn refresh_token_if_expired(&self, min_validity: i64) -> Result<RefreshOutcome> {
        let _guard = self.refresh_lock.lock().await;

        match self.provider.update_token(min_validity).await {
            Ok(refreshed) => {
                if refreshed {
                    self.update_stored_tokens();
                    debug!(driver = Self::NAME, "token was successfully refreshed");
                }
                Ok(RefreshOutcome::new(refreshed, self.store.get(), false))
            }
            Err(refresh_err) => {
                warn!(driver = Self::NAME, error = %refresh_err, "token refresh failed, logging in again");
                self.provider.login().await.map_err(|login_err| {
                    RestError::Refresh(format!(
                        "{}; login fallback failed: {}",
                        refresh_err, login_err
                    ))
                })?;
                self.update_stored_tokens();
                Ok(RefreshOutcome::new(false, self.store.get(), true))
            }
        }
    }

    fn get_stored_tokens(&self) -> Credential {
        self.store.get()
    }

    fn set_stored_tokens(&self, credential: &Credential) {
        self.store.set(credential);
    }

    fn clear_stored_tokens(&self) {
        self.store.clear();
    }
}
