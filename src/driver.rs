//! Identity-provider drivers owning the OAuth2 session.
//!
//! A driver moves through `Unauthenticated -> Authenticating -> Valid`, and
//! from `Valid` near expiry through `Refreshing` back to `Valid`. A failed
//! refresh falls back to `Authenticating`; there is no terminal failure state.

pub mod keycloak;
pub mod mock;

use crate::error::{RestError, Result};
use crate::token::{decode_jwt_claims, Credential};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub use keycloak::{IdentityProvider, InitOptions, KeycloakClient, KeycloakConfig, KeycloakDriver, LoginGrant, OnLoad};
pub use mock::MockTokenDriver;

/// Seconds of remaining validity under which a token is refreshed
pub const DEFAULT_MIN_VALIDITY: i64 = 5;

/// Result of [`TokenDriver::initialize`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitOutcome {
    /// Best-known credential, possibly empty
    pub credential: Credential,
    pub authenticated: bool,
    /// Set when the provider failed; the caller may retry the login flow
    pub error: bool,
}

/// Result of a refresh-if-expired check
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    /// A refresh round trip replaced the credential
    pub refreshed: bool,
    /// Credential current after the check
    pub credential: Credential,
    /// The refresh failed and the driver re-authenticated instead
    pub error: bool,
    pub timestamp: DateTime<Utc>,
}

impl RefreshOutcome {
    pub fn new(refreshed: bool, credential: Credential, error: bool) -> Self {
        RefreshOutcome {
            refreshed,
            credential,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Decoded claim sets of the current session tokens
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTokens {
    /// Claims of the id token
    pub token: Option<Value>,
    pub refresh_token: Option<Value>,
}

/// Owner of one identity-provider session and its stored credential
#[async_trait]
pub trait TokenDriver: Send + Sync {
    /// Storage namespace and log name of the driver
    fn name(&self) -> &str;

    /// Log in unless a valid session exists. Provider failures are reported
    /// through [`InitOutcome::error`], never as an `Err`.
    async fn initialize(&self) -> InitOutcome;

    /// Initialize and return the stored credential
    async fn authenticate(&self) -> Result<Credential> {
        let outcome = self.initialize().await;
        if outcome.error || !outcome.authenticated {
            return Err(RestError::IdentityProvider(format!(
                "{}: login did not complete",
                self.name()
            )));
        }
        Ok(self.get_stored_tokens())
    }

    /// Refresh the credential when it expires within `min_validity` seconds.
    ///
    /// A failed refresh falls back to a fresh login and reports
    /// `refreshed: false, error: true`; only a failed fallback is an `Err`.
    async fn refresh_token_if_expired(&self, min_validity: i64) -> Result<RefreshOutcome>;

    fn get_stored_tokens(&self) -> Credential;

    fn set_stored_tokens(&self, credential: &Credential);

    fn clear_stored_tokens(&self);

    fn get_parsed_tokens(&self) -> ParsedTokens {
        let stored = self.get_stored_tokens();
        ParsedTokens {
            token: stored.id_token.as_deref().and_then(decode_jwt_claims),
            refresh_token: decode_jwt_claims(&stored.refresh_token),
        }
    }
}
