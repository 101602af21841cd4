use crate::auth::{AuthAdapter, AuthRegistry, AuthScheme};
use crate::cache::ResponseCache;
use crate::client::Config;
use crate::convert::{deserialize, Target};
use crate::error::Result;
use crate::request::{
    build_url, encode_body, json_preferred_mime, normalize_params, FormParam, RequestDescriptor,
    DEFAULT_CONTENT_TYPE,
};
use crate::response::{handle_outcome, normalize, ApiResponse, ErrorCallback, SuccessCallback};
use crate::token::Credential;
use crate::transport::{ReqwestTransport, Transport};
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type ResolvedAuth = (AuthScheme, Arc<dyn AuthAdapter>);

/// Request half of an [`ApiCall`]
struct CallParts {
    path: String,
    method: Method,
    path_params: BTreeMap<String, Value>,
    query_params: BTreeMap<String, Value>,
    header_params: BTreeMap<String, Value>,
    form_params: BTreeMap<String, FormParam>,
    body: Option<Value>,
    auth_names: Vec<String>,
    content_types: Vec<String>,
    accepts: Vec<String>,
    return_type: Option<Target>,
    timeout: Option<Duration>,
}

/// One API call, built up before being handed to [`ApiClient::call_api`]
pub struct ApiCall {
    parts: CallParts,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl ApiCall {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiCall {
            parts: CallParts {
                path: path.into(),
                method,
                path_params: BTreeMap::new(),
                query_params: BTreeMap::new(),
                header_params: BTreeMap::new(),
                form_params: BTreeMap::new(),
                body: None,
                auth_names: Vec::new(),
                content_types: Vec::new(),
                accepts: Vec::new(),
                return_type: None,
                timeout: None,
            },
            on_success: None,
            on_error: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Value for a `{name}` placeholder of the path
    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parts.path_params.insert(name.into(), value.into());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parts.query_params.insert(name.into(), value.into());
        self
    }

    pub fn header_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parts.header_params.insert(name.into(), value.into());
        self
    }

    /// Form field or file; used with a form or multipart content type
    pub fn form_param(mut self, name: impl Into<String>, value: impl Into<FormParam>) -> Self {
        self.parts.form_params.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.parts.body = Some(body);
        self
    }

    /// Authenticate with the named scheme; may be given several times
    pub fn auth(mut self, name: impl Into<String>) -> Self {
        self.parts.auth_names.push(name.into());
        self
    }

    pub fn content_types<I, S>(mut self, mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parts.content_types = mimes.into_iter().map(Into::into).collect();
        self
    }

    pub fn accepts<I, S>(mut self, mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parts.accepts = mimes.into_iter().map(Into::into).collect();
        self
    }

    /// Convert the response body to `target` before handing it out
    pub fn returns(mut self, target: Target) -> Self {
        self.parts.return_type = Some(target);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.parts.timeout = Some(timeout);
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Option<Value>) + Send + 'static,
    {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(crate::error::RestError) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }
}

/// Client running calls through the request pipeline.
///
/// The auth registry is shared and re-read on every call; adapters and schemes
/// may be replaced while the client is in use.
pub struct ApiClient {
    config: RwLock<Config>,
    transport: Arc<dyn Transport>,
    registry: Arc<AuthRegistry>,
    cache: Option<Arc<ResponseCache>>,
}

impl ApiClient {
    /// Client over the default `reqwest` transport
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self::with_transport(config, Arc::new(ReqwestTransport::new()?)))
    }

    /// Client over a caller-supplied `reqwest::Client`
    pub fn with_http_client(config: Config, client: Client) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::with_client(client)))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        ApiClient {
            config: RwLock::new(config),
            transport,
            registry: Arc::new(AuthRegistry::new()),
            cache: None,
        }
    }

    /// Share an auth registry with other clients
    pub fn with_registry(mut self, registry: Arc<AuthRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn registry(&self) -> &Arc<AuthRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Header sent with every later call
    pub fn set_default_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.config
            .write()
            .default_headers
            .insert(name.into(), value.into());
    }

    /// Log in through the adapter serving the named scheme
    pub async fn authenticate(&self, auth_name: &str) -> Result<Credential> {
        self.registry.authenticate(auth_name).await
    }

    /// Run a call and report its outcome through the call's callbacks.
    ///
    /// Configuration errors (unknown scheme, missing adapter) are returned before
    /// anything is sent and never reach the callbacks. Any other failure goes to
    /// the error callback, or comes back as [`crate::RestError::Unhandled`] when
    /// there is none. Returns the descriptor that was dispatched, auth included.
    pub async fn call_api(&self, call: ApiCall) -> Result<RequestDescriptor> {
        let ApiCall {
            parts,
            on_success,
            on_error,
        } = call;
        let (dispatched, outcome) = self.run(&parts).await?;
        let context = format!("{} {} failed", dispatched.method, dispatched.url);
        handle_outcome(outcome, on_success, on_error, &context)?;
        Ok(dispatched)
    }

    /// Run a call and return its converted body, or the raw body when the call
    /// names no return target.
    ///
    /// Callbacks registered on the call are not invoked.
    pub async fn execute(&self, call: ApiCall) -> Result<Option<Value>> {
        let (_, outcome) = self.run(&call.parts).await?;
        outcome
    }

    /// Run a call and deserialize its body into `T`
    pub async fn apply<T>(&self, call: ApiCall) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut call = call;
        call.parts.return_type.get_or_insert(Target::Any);
        let value = self.execute(call).await?.unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// Outer `Err` is a configuration error; the inner result is the call outcome.
    async fn run(&self, parts: &CallParts) -> Result<(RequestDescriptor, Result<Option<Value>>)> {
        let auths = parts
            .auth_names
            .iter()
            .map(|name| self.registry.resolve(name))
            .collect::<Result<Vec<ResolvedAuth>>>()?;
        let request = self.build_request(parts);
        let legacy = self.config.read().legacy;

        let mut dispatched = request.clone();
        if let Err(e) = self.refresh(&auths).await {
            return Ok((dispatched, Err(e)));
        }
        for (scheme, adapter) in &auths {
            adapter.apply_auth_to_request(scheme, &mut dispatched)?;
        }

        let outcome = match self.send(&dispatched).await {
            Ok(response) => normalize(response, legacy).map(|response| match parts.return_type {
                Some(ref target) => deserialize(&response, Some(target)),
                None => response.data(),
            }),
            Err(e) => Err(e),
        };
        Ok((dispatched, outcome))
    }

    fn build_request(&self, parts: &CallParts) -> RequestDescriptor {
        let config = self.config.read().clone();
        let url = build_url(&config.base_url(), &parts.path, &parts.path_params);

        let mut request = RequestDescriptor::new(parts.method.clone(), url);
        request.path_params = normalize_params(&parts.path_params);
        request.query_params = normalize_params(&parts.query_params);
        request.timeout = parts.timeout.unwrap_or(config.timeout);
        let busted = parts.method == Method::GET && !config.cache;
        if busted {
            request
                .query_params
                .insert("_".to_string(), Utc::now().timestamp_millis().to_string());
        }

        for (name, value) in &config.default_headers {
            request.set_header(name, value.clone());
        }
        for (name, value) in normalize_params(&parts.header_params) {
            request.set_header(&name, value);
        }

        let content_type = json_preferred_mime(&parts.content_types);
        match content_type {
            Some(mime) => request.set_header("Content-Type", mime),
            None if request.header("Content-Type").is_none() => {
                request.set_header("Content-Type", DEFAULT_CONTENT_TYPE)
            }
            None => {}
        }
        if let Some(accept) = json_preferred_mime(&parts.accepts) {
            request.set_header("Accept", accept);
        }
        request.body = encode_body(content_type, &parts.form_params, parts.body.as_ref());

        // busted URLs never repeat
        request.cache_eligible = !busted
            && self
                .cache
                .as_ref()
                .map(|cache| cache.should_cache(&request))
                .unwrap_or(false);
        request
    }

    async fn refresh(&self, auths: &[ResolvedAuth]) -> Result<()> {
        for (scheme, adapter) in auths {
            let Some(refresher) = adapter.refresher() else {
                continue;
            };
            let outcome = refresher.refresh_token_if_expired().await?;
            if outcome.refreshed {
                info!(kind = %scheme.kind(), "token refreshed before dispatch");
            } else if outcome.error {
                warn!(kind = %scheme.kind(), "token refresh failed, session re-established by login");
            }
        }
        Ok(())
    }

    /// Dispatch through the cache when the request is eligible
    async fn send(&self, request: &RequestDescriptor) -> Result<ApiResponse> {
        let cache = self.cache.as_ref().filter(|_| request.cache_eligible);
        let key = request.cache_key();

        if let Some(cache) = cache {
            match cache.get(&key).await {
                Ok(Some(hit)) => {
                    debug!(method = %request.method, url = %request.url, "cache hit");
                    return Ok(ApiResponse::from_transport(hit));
                }
                Ok(None) => debug!(method = %request.method, url = %request.url, "cache miss"),
                Err(e) => warn!(error = %e, "cache read failed"),
            }
        }

        let start = Instant::now();
        let raw = self.transport.send(request).await?;
        info!(
            method = %request.method,
            url = %request.url,
            status = raw.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );

        let response = ApiResponse::from_transport(raw.clone());
        if let Some(cache) = cache {
            if response.is_success() {
                if let Err(e) = cache.put(&key, &raw).await {
                    warn!(error = %e, "cache write failed");
                }
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthKind, BasicAuthAdapter, OAuth2AuthAdapter};
    use crate::driver::MockTokenDriver;
    use crate::error::RestError;
    use crate::request::RequestBody;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Transport answering every request with a fixed response
    struct FixedTransport {
        status: u16,
        body: String,
        sent: Mutex<Vec<RequestDescriptor>>,
    }

    impl FixedTransport {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(FixedTransport {
                status,
                body: body.to_string(),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<RequestDescriptor> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(TransportResponse {
                status: self.status,
                headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                body: self.body.as_bytes().to_vec(),
            })
        }
    }

    fn config() -> Config {
        Config::from_url("http://api.test/v1").unwrap()
    }

    #[tokio::test]
    async fn test_request_building() {
        let transport = FixedTransport::new(200, "{}");
        let client = ApiClient::with_transport(config().with_cache(false), transport.clone());
        client.set_default_header("X-App", "demo");

        let dispatched = client
            .call_api(
                ApiCall::get("/users/{id}")
                    .path_param("id", "a b")
                    .query_param("tags", json!(["x", "y"]))
                    .query_param("skip", Value::Null)
                    .accepts(["text/plain", "application/json"]),
            )
            .await
            .unwrap();

        assert_eq!(dispatched.url, "http://api.test/v1/users/a%20b");
        assert_eq!(dispatched.query_params["tags"], "x,y");
        assert!(!dispatched.query_params.contains_key("skip"));
        assert!(dispatched.query_params.contains_key("_"));
        assert_eq!(dispatched.header("accept"), Some("application/json"));
        assert_eq!(dispatched.header("content-type"), Some(DEFAULT_CONTENT_TYPE));
        assert_eq!(dispatched.header("x-app"), Some("demo"));
        assert_eq!(transport.sent(), vec![dispatched]);
    }

    #[tokio::test]
    async fn test_cache_flag_suppresses_buster() {
        let transport = FixedTransport::new(200, "{}");
        let client = ApiClient::with_transport(config(), transport);
        let dispatched = client.call_api(ApiCall::get("/items")).await.unwrap();
        assert!(!dispatched.query_params.contains_key("_"));
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_not_dispatched() {
        let transport = FixedTransport::new(200, "{}");
        let client = ApiClient::with_transport(config(), transport.clone());
        let err = client
            .call_api(
                ApiCall::get("/x")
                    .auth("nope")
                    .on_error(|_| panic!("configuration errors skip callbacks")),
            )
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_auth_applied_to_clone_only() {
        let transport = FixedTransport::new(200, "{}");
        let client = ApiClient::with_transport(config(), transport.clone());
        client
            .registry()
            .define_scheme("basicAuth", AuthScheme::basic("u", "p"));
        client
            .registry()
            .register(AuthKind::Basic, Arc::new(BasicAuthAdapter));

        let dispatched = client
            .call_api(ApiCall::get("/x").auth("basicAuth"))
            .await
            .unwrap();
        assert_eq!(dispatched.header("authorization"), Some("Basic dTpw"));
        assert_eq!(transport.sent()[0].header("authorization"), Some("Basic dTpw"));
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_before_dispatch() {
        let transport = FixedTransport::new(200, "{}");
        let driver = Arc::new(MockTokenDriver::new());
        let client = ApiClient::with_transport(config(), transport.clone());
        client
            .registry()
            .register(AuthKind::OAuth2, Arc::new(OAuth2AuthAdapter::new(driver.clone())));
        client.authenticate("OAuth2").await.unwrap();
        driver.expire();

        client.call_api(ApiCall::get("/me").auth("OAuth2")).await.unwrap();
        assert_eq!(transport.sent()[0].header("authorization"), Some("Bearer ACCESS_2"));
        assert_eq!(driver.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_goes_to_error_callback() {
        let transport = FixedTransport::new(200, "{}");
        let driver = Arc::new(MockTokenDriver::new());
        let client = ApiClient::with_transport(config(), transport.clone());
        client
            .registry()
            .register(AuthKind::OAuth2, Arc::new(OAuth2AuthAdapter::new(driver.clone())));
        driver.expire();
        driver.fail_refresh(true);
        driver.fail_login(true);

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        client
            .call_api(
                ApiCall::get("/me")
                    .auth("OAuth2")
                    .on_error(move |e| *sink.lock().unwrap() = Some(e)),
            )
            .await
            .unwrap();
        assert!(matches!(*seen.lock().unwrap(), Some(RestError::Refresh(_))));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_http_error_without_callback_is_unhandled() {
        let transport = FixedTransport::new(500, r#"{"error": "boom"}"#);
        let client = ApiClient::with_transport(config(), transport);
        let err = client.call_api(ApiCall::get("/x")).await.unwrap_err();
        assert!(matches!(err, RestError::Unhandled { .. }));
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.body(), Some(&json!({"error": "boom"})));
    }

    #[tokio::test]
    async fn test_success_callback_gets_converted_body() {
        let transport = FixedTransport::new(200, r#"{"data": {"count": "7"}}"#);
        let client = ApiClient::with_transport(config().with_legacy(true), transport);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        client
            .call_api(
                ApiCall::get("/count")
                    .returns(Target::map(Target::String, Target::Integer))
                    .on_success(move |v| *sink.lock().unwrap() = v),
            )
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(json!({"count": 7})));
    }

    #[tokio::test]
    async fn test_execute_and_apply() {
        #[derive(serde::Deserialize)]
        struct Item {
            id: u32,
        }

        let transport = FixedTransport::new(200, r#"{"id": 3}"#);
        let client = ApiClient::with_transport(config(), transport);
        assert_eq!(client.execute(ApiCall::get("/item")).await.unwrap(), Some(json!({"id": 3})));
        let item: Item = client.apply(ApiCall::get("/item")).await.unwrap();
        assert_eq!(item.id, 3);
    }

    #[tokio::test]
    async fn test_json_array_body_is_wrapped() {
        let transport = FixedTransport::new(201, "");
        let client = ApiClient::with_transport(config(), transport.clone());
        client
            .call_api(ApiCall::post("/bulk").body(json!([1, 2])))
            .await
            .unwrap();
        assert_eq!(transport.sent()[0].body, RequestBody::Json(json!({"content": [1, 2]})));
    }

    #[tokio::test]
    async fn test_busted_gets_are_not_stored() {
        use crate::cache::{CacheDriver, MemoryDriver};

        let transport = FixedTransport::new(200, r#"{"id": 1}"#);
        let memory = Arc::new(MemoryDriver::new());
        let drivers: Vec<Arc<dyn CacheDriver>> = vec![memory.clone()];
        let cache = ResponseCache::new()
            .with_drivers(drivers)
            .include("/catalog/")
            .unwrap();
        let client = ApiClient::with_transport(config().with_cache(false), transport.clone()).with_cache(cache);

        for _ in 0..5 {
            let dispatched = client.call_api(ApiCall::get("/catalog/items")).await.unwrap();
            assert!(!dispatched.cache_eligible);
        }
        assert_eq!(transport.sent().len(), 5);
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_success_callback_gets_body_without_target() {
        let transport = FixedTransport::new(200, r#"{"data": {"id": 1}}"#);
        let client = ApiClient::with_transport(config().with_legacy(true), transport);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        client
            .call_api(ApiCall::get("/legacy").on_success(move |v| *sink.lock().unwrap() = v))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(json!({"id": 1})));
    }
}
