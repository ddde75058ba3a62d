//! Gateway integration tests.
//!
//! Requests go through the real catch-all handler in-process; the upstream chat
//! API is a wiremock server and the upstream credential lives in a temp dir.

use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use claudex_auth::{Credential, CredentialManager, OAuthConfig};
use claudex_proxy::{dispatch, AppState, ProxyConfig, Relay};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{any, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOUR_MS: i64 = 3_600_000;
const CHAT_PATH: &str = "/v1/chat/completions";

struct Harness {
    upstream: MockServer,
    state: web::Data<AppState>,
    _dir: TempDir,
}

async fn harness(with_credential: bool) -> Harness {
    harness_with_upstream(with_credential, None).await
}

/// `upstream_url` overrides the chat endpoint; the mock server still issues tokens.
async fn harness_with_upstream(with_credential: bool, upstream_url: Option<String>) -> Harness {
    let upstream = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut config = ProxyConfig::default();
    config.upstream_url =
        upstream_url.unwrap_or_else(|| format!("{}{}", upstream.uri(), CHAT_PATH));
    config.key_prefix = "sk-ant-".to_string();
    config.auth = OAuthConfig {
        issuer: upstream.uri(),
        callback_port: 0,
        credential_path: dir.path().join("credential.json"),
        open_browser: false,
        ..OAuthConfig::default()
    };

    let manager = CredentialManager::new(config.auth.clone()).unwrap();
    if with_credential {
        let expires_at = chrono::Utc::now().timestamp_millis() + HOUR_MS;
        manager
            .save(&Credential::new("upstream-token", "upstream-refresh", expires_at))
            .unwrap();
    }

    let relay = Relay::new(reqwest::Client::new(), config.upstream_url.clone());
    let state = web::Data::new(AppState::new(config, Arc::new(manager), relay));

    Harness {
        upstream,
        state,
        _dir: dir,
    }
}

fn chat_body(stream: bool) -> Value {
    json!({
        "model": "claude-sonnet-4-5-20250929",
        "max_tokens": 128,
        "stream": stream,
        "system": "be terse",
        "messages": [{"role": "user", "content": "hello"}]
    })
}

fn chat_request(key: &str, body: &Value) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/v1/messages")
        .insert_header(("host", "api.anthropic.com"))
        .insert_header(("x-api-key", key))
        .insert_header(("content-type", "application/json"))
        .set_payload(body.to_string())
}

async fn mount_no_upstream_calls(server: &MockServer) {
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}

#[actix_web::test]
async fn wrong_key_prefix_is_rejected() {
    let h = harness(true).await;
    mount_no_upstream_calls(&h.upstream).await;
    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let resp =
        test::call_service(&app, chat_request("sk-proj-123", &chat_body(false)).to_request())
            .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[actix_web::test]
async fn malformed_json_is_invalid_request() {
    let h = harness(true).await;
    mount_no_upstream_calls(&h.upstream).await;
    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/messages")
        .insert_header(("authorization", "Bearer sk-ant-abc"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[actix_web::test]
async fn missing_upstream_credential_is_authentication_error() {
    let h = harness(false).await;
    mount_no_upstream_calls(&h.upstream).await;
    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let resp =
        test::call_service(&app, chat_request("sk-ant-abc", &chat_body(false)).to_request())
            .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[actix_web::test]
async fn non_streaming_round_trip() {
    let h = harness(true).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer upstream-token"))
        .and(body_partial_json(json!({
            "model": "gpt-5.2-codex",
            "stream": false,
            "store": false,
            "max_tokens": 128,
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-42",
            "choices": [{
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2}
        })))
        .expect(1)
        .mount(&h.upstream)
        .await;

    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let resp =
        test::call_service(&app, chat_request("sk-ant-abc", &chat_body(false)).to_request())
            .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body,
        json!({
            "id": "chatcmpl-42",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi there"}],
            "model": "claude-sonnet-4-5-20250929",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 9, "output_tokens": 2}
        })
    );
}

#[actix_web::test]
async fn streaming_round_trip_preserves_event_order() {
    let h = harness(true).await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"one \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .expect(1)
        .mount(&h.upstream)
        .await;

    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let resp =
        test::call_service(&app, chat_request("sk-ant-abc", &chat_body(true)).to_request())
            .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    let events: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(
        events,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert!(text.contains("\"text\":\"one \""));
    assert!(text.contains("\"stop_reason\":\"end_turn\""));
    assert_eq!(h.state.relay.stats().dropped_frames(), 1);
}

#[actix_web::test]
async fn upstream_error_status_is_bad_gateway() {
    let h = harness(true).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal detail"))
        .mount(&h.upstream)
        .await;

    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let resp =
        test::call_service(&app, chat_request("sk-ant-abc", &chat_body(false)).to_request())
            .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "api_error");
    assert!(!body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("internal detail"));
}

#[actix_web::test]
async fn count_tokens_is_answered_locally() {
    let h = harness(false).await;
    mount_no_upstream_calls(&h.upstream).await;
    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/messages/count_tokens")
        .insert_header(("x-api-key", "sk-ant-abc"))
        .set_payload(
            json!({
                "model": "claude-sonnet-4-5",
                "system": "abc",
                "messages": [{"role": "user", "content": "defgh"}]
            })
            .to_string(),
        )
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"input_tokens": 2}));
}

#[actix_web::test]
async fn auth_traffic_gets_canned_answers() {
    let h = harness(false).await;
    mount_no_upstream_calls(&h.upstream).await;
    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/oauth/authorize?redirect_uri=http%3A%2F%2Flocalhost%3A5000%2Fcb&state=s1")
        .insert_header(("host", "claude.ai"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers().get("location").unwrap(),
        "http://localhost:5000/cb?code=claudex-mock-code&state=s1"
    );

    let req = test::TestRequest::get()
        .uri("/api/oauth/profile")
        .insert_header(("host", "api.anthropic.com"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["account"]["email"].is_string());

    let req = test::TestRequest::get()
        .uri("/")
        .insert_header(("host", "console.anthropic.com:443"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"status": "ok", "authenticated": true}));
}

#[actix_web::test]
async fn health_and_passthrough() {
    let h = harness(false).await;
    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"OK"));

    let req = test::TestRequest::get()
        .uri("/v1/models")
        .insert_header(("host", "example.com"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"status": "ok"}));
}

#[actix_web::test]
async fn chat_host_traffic_is_not_passed_through() {
    let h = harness(true).await;
    mount_no_upstream_calls(&h.upstream).await;
    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    // Any path on the chat API host goes through the key check.
    let req = test::TestRequest::post()
        .uri("/v1/complete")
        .insert_header(("host", "api.anthropic.com"))
        .set_payload("{}")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[actix_web::test]
async fn unparsable_upstream_body_is_bad_gateway() {
    let h = harness(true).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>oops"),
        )
        .expect(1)
        .mount(&h.upstream)
        .await;

    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    let resp =
        test::call_service(&app, chat_request("sk-ant-abc", &chat_body(false)).to_request())
            .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "api_error");
    assert!(!body["error"]["message"].as_str().unwrap().contains("oops"));
}

#[actix_web::test]
async fn unreachable_upstream_is_bad_gateway() {
    // Reserve a port, then free it so nothing is listening there.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let h = harness_with_upstream(
        true,
        Some(format!("http://127.0.0.1:{}{}", port, CHAT_PATH)),
    )
    .await;

    let app = test::init_service(
        App::new()
            .app_data(h.state.clone())
            .default_service(web::to(dispatch)),
    )
    .await;

    for stream in [false, true] {
        let resp =
            test::call_service(&app, chat_request("sk-ant-abc", &chat_body(stream)).to_request())
                .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "api_error");
    }
}
