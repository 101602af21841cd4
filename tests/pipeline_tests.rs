use restpipe::cache::DirectoryDriver;
use restpipe::request::{FORM_URLENCODED, MULTIPART_FORM_DATA};
use restpipe::{
    ApiCall, ApiClient, ApiKeyAuthAdapter, ApiKeyLocation, AuthKind, AuthScheme, BasicAuthAdapter, CacheDriver,
    Config, FilePart, MockTokenDriver, OAuth2AuthAdapter, ResponseCache, RestError, Target, TokenDriver,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_json, body_string, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(Config::from_url(&server.uri()).unwrap()).unwrap()
}

#[tokio::test]
async fn test_allow_listed_get_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalog/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;

    let cache = ResponseCache::new().include(r"/catalog/").unwrap();
    let client = client_for(&server).with_cache(cache);

    for _ in 0..2 {
        let items = client
            .execute(ApiCall::get("/catalog/items").returns(Target::list(Target::Any)))
            .await
            .unwrap();
        assert_eq!(items, Some(json!([{"id": 1}])));
    }
}

#[tokio::test]
async fn test_unlisted_get_always_hits_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"open": 2})))
        .expect(2)
        .mount(&server)
        .await;

    let cache = ResponseCache::new().include(r"/catalog/").unwrap();
    let client = client_for(&server).with_cache(cache);

    for _ in 0..2 {
        client.call_api(ApiCall::get("/orders")).await.unwrap();
    }
}

#[tokio::test]
async fn test_failed_responses_are_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalog/broken"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let cache = ResponseCache::new().include(r"/catalog/").unwrap();
    let client = client_for(&server).with_cache(cache);

    for _ in 0..2 {
        let err = client.execute(ApiCall::get("/catalog/broken")).await.unwrap_err();
        assert_eq!(err.status_code(), Some(503));
    }
}

#[tokio::test]
async fn test_directory_cache_survives_client_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalog/persisted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"v": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    for _ in 0..2 {
        let drivers: Vec<Arc<dyn CacheDriver>> = vec![Arc::new(DirectoryDriver::new(dir.path()))];
        let cache = ResponseCache::new()
            .with_drivers(drivers)
            .include(r"/catalog/")
            .unwrap();
        let client = client_for(&server).with_cache(cache);
        let body = client
            .execute(ApiCall::get("/catalog/persisted").returns(Target::Any))
            .await
            .unwrap();
        assert_eq!(body, Some(json!({"v": 1})));
    }
}

#[tokio::test]
async fn test_refreshed_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Bearer ACCESS_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "demo"})))
        .expect(1)
        .mount(&server)
        .await;

    let driver = Arc::new(MockTokenDriver::new());
    let client = client_for(&server);
    client
        .registry()
        .register(AuthKind::OAuth2, Arc::new(OAuth2AuthAdapter::new(driver.clone())));
    client.authenticate("OAuth2").await.unwrap();
    driver.expire();

    let dispatched = client
        .call_api(ApiCall::get("/me").auth("OAuth2"))
        .await
        .unwrap();
    assert_eq!(dispatched.header("authorization"), Some("Bearer ACCESS_2"));
}

#[tokio::test]
async fn test_unknown_scheme_never_dispatches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .call_api(ApiCall::get("/me").auth("doesNotExist"))
        .await
        .unwrap_err();
    assert!(matches!(err, RestError::Configuration(_)));
}

#[tokio::test]
async fn test_server_error_without_callback_fails_hard() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/boom"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "internal"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.call_api(ApiCall::get("/boom")).await.unwrap_err();
    assert!(matches!(err, RestError::Unhandled { .. }));
    assert_eq!(err.status_code(), Some(500));
    assert!(err.to_string().contains("failed"));
}

#[tokio::test]
async fn test_server_error_with_callback_carries_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/items/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "gone"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    client
        .call_api(
            ApiCall::delete("/items/{id}")
                .path_param("id", 9)
                .on_success(|_| panic!("404 is not a success"))
                .on_error(move |e| *sink.lock().unwrap() = Some(e)),
        )
        .await
        .unwrap();

    let err = seen.lock().unwrap().take().unwrap();
    assert!(err.is_not_found());
    assert_eq!(err.body(), Some(&json!({"message": "gone"})));
}

#[tokio::test]
async fn test_legacy_envelope_is_unwrapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/legacy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"x": 1}})))
        .mount(&server)
        .await;

    let legacy = ApiClient::new(Config::from_url(&server.uri()).unwrap().with_legacy(true)).unwrap();
    let body = legacy
        .execute(ApiCall::get("/legacy").returns(Target::Any))
        .await
        .unwrap();
    assert_eq!(body, Some(json!({"x": 1})));

    let plain = client_for(&server);
    let body = plain
        .execute(ApiCall::get("/legacy").returns(Target::Any))
        .await
        .unwrap();
    assert_eq!(body, Some(json!({"data": {"x": 1}})));
}

#[tokio::test]
async fn test_success_flag_overrides_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accepted"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"success": true, "id": "7"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let body = client
        .execute(ApiCall::post("/accepted").returns(Target::map(Target::String, Target::String)))
        .await
        .unwrap();
    assert_eq!(body, Some(json!({"success": "true", "id": "7"})));
}

#[tokio::test]
async fn test_no_content_yields_no_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/items/1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let body = client
        .execute(ApiCall::put("/items/1").body(json!({"a": 1})).returns(Target::Any))
        .await
        .unwrap();
    assert_eq!(body, None);
}

#[tokio::test]
async fn test_json_array_body_is_wrapped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bulk"))
        .and(body_json(json!({"content": [1, 2, 3]})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .call_api(ApiCall::post("/bulk").body(json!([1, 2, 3])))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_form_body_is_url_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("Content-Type", FORM_URLENCODED))
        .and(body_string("a=1&b=x+y"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .call_api(
            ApiCall::post("/login")
                .content_types([FORM_URLENCODED])
                .form_param("a", json!(1))
                .form_param("b", json!("x y"))
                .form_param("skip", json!(null)),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_multipart_carries_fields_and_files() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"title\""))
        .and(body_string_contains("filename=\"notes.txt\""))
        .and(body_string_contains("hello file"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .call_api(
            ApiCall::post("/upload")
                .content_types([MULTIPART_FORM_DATA])
                .form_param("title", json!("Notes"))
                .form_param(
                    "file",
                    FilePart::new("notes.txt", b"hello file".to_vec()).with_content_type("text/plain"),
                ),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_api_key_in_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("api_key", "secret"))
        .and(query_param("q", "rust,tokio"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .registry()
        .define_scheme("queryKey", AuthScheme::api_key("api_key", ApiKeyLocation::Query, "secret"));
    client
        .registry()
        .register(AuthKind::ApiKey, Arc::new(ApiKeyAuthAdapter));

    client
        .call_api(
            ApiCall::get("/search")
                .auth("queryKey")
                .query_param("q", json!(["rust", "tokio"])),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_legacy_callback_without_target_gets_unwrapped_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/legacy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": 1}})))
        .mount(&server)
        .await;

    let client = ApiClient::new(Config::from_url(&server.uri()).unwrap().with_legacy(true)).unwrap();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    client
        .call_api(ApiCall::get("/legacy").on_success(move |body| *sink.lock().unwrap() = body))
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(json!({"id": 1})));
}

#[tokio::test]
async fn test_redefined_scheme_applies_to_next_call() {
    let server = MockServer::start().await;
    // "first:one" then "second:two"
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Basic Zmlyc3Q6b25l"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Basic c2Vjb25kOnR3bw=="))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .registry()
        .define_scheme("basicAuth", AuthScheme::basic("first", "one"));
    client
        .registry()
        .register(AuthKind::Basic, Arc::new(BasicAuthAdapter));
    client
        .call_api(ApiCall::get("/me").auth("basicAuth"))
        .await
        .unwrap();

    client
        .registry()
        .define_scheme("basicAuth", AuthScheme::basic("second", "two"));
    client
        .call_api(ApiCall::get("/me").auth("basicAuth"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_replaced_adapter_applies_to_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Bearer ACCESS_1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Bearer ACCESS_2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let first = Arc::new(MockTokenDriver::new());
    let second = Arc::new(MockTokenDriver::new());
    second.set_stored_tokens(&MockTokenDriver::refreshed_credential());

    let client = client_for(&server);
    client
        .registry()
        .register(AuthKind::OAuth2, Arc::new(OAuth2AuthAdapter::new(first.clone())));
    client.authenticate("OAuth2").await.unwrap();
    let dispatched = client
        .call_api(ApiCall::get("/me").auth("OAuth2"))
        .await
        .unwrap();
    assert_eq!(dispatched.header("authorization"), Some("Bearer ACCESS_1"));

    client
        .registry()
        .register(AuthKind::OAuth2, Arc::new(OAuth2AuthAdapter::new(second.clone())));
    let dispatched = client
        .call_api(ApiCall::get("/me").auth("OAuth2"))
        .await
        .unwrap();
    assert_eq!(dispatched.header("authorization"), Some("Bearer ACCESS_2"));
    assert_eq!(second.refresh_count(), 0);
}
