use serde_json::Value;
use thiserror::Error;

/// Main error type for REST API operations
#[derive(Debug, Error)]
pub enum RestError {
    /// Unknown auth scheme, or a registered adapter that cannot serve the scheme.
    /// Fatal to the call and never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Token refresh failed and the fallback login failed as well
    #[error("token refresh failed: {0}")]
    Refresh(String),

    /// Non-success HTTP response
    #[error("HTTP error {status}")]
    Http {
        status: u16,
        /// Parsed response body, or the raw text as a JSON string when unparseable
        body: Option<Value>,
    },

    /// An error reached the end of the pipeline with no error callback registered
    #[error("{context}: {source}")]
    Unhandled {
        context: String,
        #[source]
        source: Box<RestError>,
    },

    /// Identity provider rejected or failed a login/refresh round trip
    #[error("identity provider error: {0}")]
    IdentityProvider(String),

    /// Cache or token storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl RestError {
    /// Create a new HTTP error
    pub fn http(status: u16, body: Option<Value>) -> Self {
        RestError::Http { status, body }
    }

    /// Wrap an error that nobody handled
    pub fn unhandled(context: impl Into<String>, source: RestError) -> Self {
        RestError::Unhandled {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, RestError::Configuration(_))
    }

    /// Check if this error is a permission denied error (403)
    pub fn is_permission_denied(&self) -> bool {
        self.status_code() == Some(403)
    }

    /// Check if this error is a not found error (404)
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Get the HTTP status code carried by this error, looking through
    /// unhandled wrappers and transport errors
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RestError::Http { status, .. } => Some(*status),
            RestError::Unhandled { source, .. } => source.status_code(),
            RestError::Reqwest(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Response body attached to an HTTP error
    pub fn body(&self) -> Option<&Value> {
        match self {
            RestError::Http { body, .. } => body.as_ref(),
            RestError::Unhandled { source, .. } => source.body(),
            _ => None,
        }
    }
}

/// Result type for REST operations
pub type Result<T> = std::result::Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_permission_denied() {
        let error = RestError::http(403, Some(json!({"error": "permission denied"})));
        assert!(error.is_permission_denied());
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_error_not_found() {
        let error = RestError::http(404, None);
        assert!(error.is_not_found());
    }

    #[test]
    fn test_unhandled_keeps_status_and_body() {
        let error = RestError::unhandled(
            "request failed",
            RestError::http(500, Some(json!({"message": "boom"}))),
        );
        assert_eq!(error.status_code(), Some(500));
        assert_eq!(error.body().unwrap()["message"], "boom");
        assert_eq!(error.to_string(), "request failed: HTTP error 500");
    }

    #[test]
    fn test_configuration_predicate() {
        assert!(RestError::Configuration("unknown scheme".into()).is_configuration());
        assert!(!RestError::Other("x".into()).is_configuration());
    }
}
