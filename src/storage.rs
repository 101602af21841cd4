//! Session-scoped key/value storage and the credential store built on it.

use crate::token::{jwt_expiry, Credential};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Synchronous session-scoped key/value storage
pub trait SessionStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

/// Process-lifetime session storage
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    items: DashMap<String, String>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|v| v.value().clone())
    }

    fn set_item(&self, key: &str, value: &str) {
        self.items.insert(key.to_string(), value.to_string());
    }

    fn remove_item(&self, key: &str) {
        self.items.remove(key);
    }
}

/// Credential persistence for one identity-provider driver.
///
/// Keys are prefixed with the driver namespace (`keycloak_token`,
/// `keycloak_refreshToken`, ...) so several drivers can share one storage.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn SessionStorage>,
    namespace: String,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn SessionStorage>, namespace: impl Into<String>) -> Self {
        TokenStore {
            storage,
            namespace: namespace.into(),
        }
    }

    /// Token store over a fresh in-memory session storage
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        TokenStore::new(Arc::new(MemorySessionStorage::new()), namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, field: &str) -> String {
        format!("{}_{}", self.namespace, field)
    }

    /// Stored credential; missing tokens come back as empty strings
    pub fn get(&self) -> Credential {
        let access_token = self.storage.get_item(&self.key("token")).unwrap_or_default();
        let refresh_token = self
            .storage
            .get_item(&self.key("refreshToken"))
            .unwrap_or_default();
        let id_token = self.storage.get_item(&self.key("idToken"));
        let expires_at = self
            .storage
            .get_item(&self.key("expiresAt"))
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| jwt_expiry(&access_token));

        Credential {
            access_token,
            refresh_token,
            id_token,
            expires_at,
        }
    }

    pub fn set(&self, credential: &Credential) {
        self.storage
            .set_item(&self.key("token"), &credential.access_token);
        self.storage
            .set_item(&self.key("refreshToken"), &credential.refresh_token);
        match credential.id_token {
            Some(ref id_token) => self.storage.set_item(&self.key("idToken"), id_token),
            None => self.storage.remove_item(&self.key("idToken")),
        }
        match credential.expires_at {
            Some(at) => self
                .storage
                .set_item(&self.key("expiresAt"), &at.to_rfc3339()),
            None => self.storage.remove_item(&self.key("expiresAt")),
        }
    }

    pub fn clear(&self) {
        for field in ["token", "refreshToken", "idToken", "expiresAt"] {
            self.storage.remove_item(&self.key(field));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_missing_tokens_are_empty_strings() {
        let store = TokenStore::in_memory("keycloak");
        let credential = store.get();
        assert_eq!(credential.access_token, "");
        assert_eq!(credential.refresh_token, "");
        assert_eq!(credential.id_token, None);
    }

    #[test]
    fn test_set_get_clear() {
        let store = TokenStore::in_memory("keycloak");
        let expiry = Utc.timestamp_opt(1_900_000_000, 0).unwrap();
        let credential = Credential::new("ACCESS_1".into(), "REFRESH_1".into())
            .with_id_token("ID_TOKEN")
            .with_expiry(expiry);
        store.set(&credential);
        assert_eq!(store.get(), credential);

        store.clear();
        assert_eq!(store.get(), Credential::default());
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
        let a = TokenStore::new(storage.clone(), "keycloak");
        let b = TokenStore::new(storage.clone(), "mock");
        a.set(&Credential::new("A".into(), String::new()));
        assert_eq!(b.get().access_token, "");
        assert_eq!(storage.get_item("keycloak_token").as_deref(), Some("A"));
    }
}
