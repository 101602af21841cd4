use crate::error::{RestError, Result};
use crate::transport::TransportResponse;
use serde_json::Value;
use std::collections::BTreeMap;

/// Statuses treated as success regardless of the body
const SUCCESS_STATUSES: [u16; 3] = [200, 201, 204];

/// Success callback; receives the (possibly converted) body when there is one
pub type SuccessCallback = Box<dyn FnOnce(Option<Value>) + Send>;

/// Error callback; receives the error, including the response body for HTTP errors
pub type ErrorCallback = Box<dyn FnOnce(RestError) + Send>;

/// ApiResponse is a transport response with its body parsed as JSON when possible.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers, names lowercased
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, absent when empty or not JSON
    pub body: Option<Value>,
    /// Raw body text
    pub text: String,
}

impl ApiResponse {
    /// Parse a transport response
    pub fn from_transport(response: TransportResponse) -> Self {
        let text = String::from_utf8_lossy(&response.body).into_owned();
        let body = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };

        ApiResponse {
            status: response.status,
            headers: response
                .headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body,
            text,
        }
    }

    /// True when the body carries `"success": true` or the status is 200, 201 or 204
    pub fn is_success(&self) -> bool {
        let flagged = self
            .body
            .as_ref()
            .and_then(|b| b.get("success"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        flagged || SUCCESS_STATUSES.contains(&self.status)
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Apply unmarshals the body into the provided type
    pub fn apply<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.body.clone().unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(RestError::from)
    }

    /// Get a value from the body by a slash-separated path.
    /// For example, "user/name" would access the "name" field inside the "user" object.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self.body.as_ref()?;

        for part in path.split('/').filter(|s| !s.is_empty()) {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    arr.get(index)?
                }
                _ => return None,
            };
        }

        Some(current)
    }

    /// Get a string value from the body by a slash-separated path
    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    /// Body handed to callers when no conversion is requested: parsed JSON,
    /// else raw text; nothing for 204
    pub fn data(&self) -> Option<Value> {
        if self.status == 204 {
            return None;
        }
        self.body_or_text()
    }

    /// Parsed JSON, else raw text
    fn body_or_text(&self) -> Option<Value> {
        self.body.clone().or_else(|| {
            if self.text.is_empty() {
                None
            } else {
                Some(Value::String(self.text.clone()))
            }
        })
    }
}

/// Classify a response.
///
/// Successful responses are returned, with one `data` level unwrapped when
/// `legacy` is set and the body has a `data` field. Anything else becomes
/// [`RestError::Http`] carrying the status and body.
pub fn normalize(response: ApiResponse, legacy: bool) -> Result<ApiResponse> {
    if !response.is_success() {
        return Err(RestError::http(response.status, response.body_or_text()));
    }

    if !legacy {
        return Ok(response);
    }

    let mut response = response;
    let inner = match response.body.as_mut() {
        Some(Value::Object(envelope)) => envelope.remove("data"),
        _ => None,
    };
    if inner.is_some() {
        response.body = inner;
    }
    Ok(response)
}

/// Route an outcome to the caller's callbacks.
///
/// An error with no error callback becomes a hard failure carrying the original
/// error and `context`.
pub fn handle_outcome(
    outcome: Result<Option<Value>>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    context: &str,
) -> Result<()> {
    match outcome {
        Ok(body) => {
            if let Some(on_success) = on_success {
                on_success(body);
            }
            Ok(())
        }
        Err(err) => match on_error {
            Some(on_error) => {
                on_error(err);
                Ok(())
            }
            None => Err(RestError::unhandled(context, err)),
        },
    }
}
