use super::{InitOutcome, RefreshOutcome, TokenDriver};
use crate::error::{RestError, Result};
use crate::storage::TokenStore;
use crate::token::Credential;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Token lifetime of the fixtures, in seconds
const FIXTURE_EXPIRES_IN: i64 = 300;

/// Deterministic driver for tests.
///
/// Login yields `ACCESS_1`; every refresh after [`MockTokenDriver::expire`]
/// yields `ACCESS_2`. No network calls are made.
pub struct MockTokenDriver {
    store: TokenStore,
    expired: AtomicBool,
    fail_refresh: AtomicBool,
    fail_login: AtomicBool,
    refreshes: AtomicUsize,
    logins: AtomicUsize,
}

impl MockTokenDriver {
    pub const NAME: &'static str = "mock";

    pub fn new() -> Self {
        MockTokenDriver {
            store: TokenStore::in_memory(Self::NAME),
            expired: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            fail_login: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
        }
    }

    /// Credential handed out by login
    pub fn initial_credential() -> Credential {
        Credential::new("ACCESS_1".to_string(), String::new())
            .with_id_token("ID_TOKEN")
            .with_expiry(Utc::now() + Duration::seconds(FIXTURE_EXPIRES_IN))
    }

    /// Credential handed out by a refresh
    pub fn refreshed_credential() -> Credential {
        Credential::new("ACCESS_2".to_string(), "REFRESH_1".to_string())
            .with_id_token("ID_TOKEN_2")
            .with_expiry(Utc::now() + Duration::seconds(FIXTURE_EXPIRES_IN))
    }

    /// Make the next refresh check find the token expiring
    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    /// Make refresh round trips fail
    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Make login fail
    pub fn fail_login(&self, fail: bool) {
        self.fail_login.store(fail, Ordering::SeqCst);
    }

    /// Number of successful refresh round trips
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Number of successful logins
    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    fn login(&self) -> Result<Credential> {
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(RestError::IdentityProvider("mock login rejected".to_string()));
        }
        let credential = Self::initial_credential();
        self.store.set(&credential);
        self.expired.store(false, Ordering::SeqCst);
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(credential)
    }
}

impl Default for MockTokenDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenDriver for MockTokenDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> InitOutcome {
        match self.login() {
            Ok(credential) => InitOutcome {
                credential,
                authenticated: true,
                error: false,
            },
            Err(_) => InitOutcome {
                credential: self.store.get(),
                authenticated: false,
                error: true,
            },
        }
    }

    async fn refresh_token_if_expired(&self, _min_validity: i64) -> Result<RefreshOutcome> {
        if !self.expired.load(Ordering::SeqCst) {
            return Ok(RefreshOutcome::new(false, self.store.get(), false));
        }

        if self.fail_refresh.load(Ordering::SeqCst) {
            let credential = self
                .login()
                .map_err(|e| RestError::Refresh(format!("mock refresh rejected; {}", e)))?;
            return Ok(RefreshOutcome::new(false, credential, true));
        }

        let credential = Self::refreshed_credential();
        self.store.set(&credential);
        self.expired.store(false, Ordering::SeqCst);
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(RefreshOutcome::new(true, credential, false))
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
