use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Credential is the token bundle issued by an identity provider.
///
/// Missing tokens are empty strings, never absent, so header construction can
/// always use them directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Access token for API requests
    #[serde(rename = "access_token", default)]
    pub access_token: String,

    /// Refresh token for renewing expired access tokens
    #[serde(rename = "refresh_token", default)]
    pub refresh_token: String,

    /// OpenID Connect id token
    #[serde(rename = "id_token", default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Access token expiry, when known
    #[serde(rename = "expires_at", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create a new Credential; the expiry is read from the access token when it is a JWT
    pub fn new(access_token: String, refresh_token: String) -> Self {
        let expires_at = jwt_expiry(&access_token);
        Credential {
            access_token,
            refresh_token,
            id_token: None,
            expires_at,
        }
    }

    /// Build a credential from a token endpoint response received at `now`
    pub fn from_response(response: &TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = response
            .expires_in
            .map(|secs| now + Duration::seconds(secs))
            .or_else(|| jwt_expiry(&response.access_token));
        Credential {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone().unwrap_or_default(),
            id_token: response.id_token.clone(),
            expires_at,
        }
    }

    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if we have an access token available
    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Check if we have a refresh token available
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// True when the access token is missing or expires within `skew_seconds` of `now`.
    /// A token with unknown expiry counts as valid.
    pub fn expires_within(&self, skew_seconds: i64, now: DateTime<Utc>) -> bool {
        if !self.has_access_token() {
            return true;
        }
        match self.expires_at {
            Some(at) => at - Duration::seconds(skew_seconds) <= now,
            None => false,
        }
    }
}

/// OAuth2 token endpoint response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub session_state: Option<String>,
}

/// Decode the claim set of a JWT without verifying its signature.
pub fn decode_jwt_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `exp` claim of a JWT
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let exp = decode_jwt_claims(token)?.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

#[cfg(test)]
pub(crate) fn fake_jwt(claims: &Value) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}
