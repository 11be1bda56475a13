//! End-to-end CSRF checks against a running gate.

use std::sync::Arc;

use feedvote_gate::config::GateConfig;
use feedvote_gate::security::SystemClock;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::Value;

mod common;

#[tokio::test]
async fn test_token_endpoint_then_matching_and_wrong_header() {
    let gate = common::start_gate(GateConfig::default(), Arc::new(SystemClock)).await;
    let client = common::client();

    let res = client.get(gate.url("/csrf-token")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookies = common::csrf_cookies(&res);
    assert_eq!(cookies.len(), 1);
    let set_cookie = res.headers().get(SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("Max-Age=3600"));
    assert!(!set_cookie.contains("Secure"));

    let body: Value = res.json().await.unwrap();
    let token = body["csrfToken"].as_str().unwrap().to_string();
    assert_eq!(token, cookies[0]);

    let cookie = format!("feedvote-csrf-token={}", token);

    let ok = client
        .post(gate.url("/api/feedback"))
        .header(COOKIE, &cookie)
        .header("x-csrf-token", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let rotated = common::csrf_cookies(&ok);
    assert_eq!(rotated.len(), 1);
    assert_ne!(rotated[0], token);
    assert_eq!(ok.headers().get("x-csrf-token").unwrap().to_str().unwrap(), rotated[0]);
    let accepted: Value = ok.json().await.unwrap();
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["path"], "/api/feedback");

    let denied = client
        .post(gate.url("/api/feedback"))
        .header(COOKIE, &cookie)
        .header("x-csrf-token", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert!(common::csrf_cookies(&denied).is_empty());
    let body: Value = denied.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "error": "Invalid CSRF token" }));

    gate.stop().await;
}

#[tokio::test]
async fn test_missing_header_with_cookie_is_rejected() {
    let gate = common::start_gate(GateConfig::default(), Arc::new(SystemClock)).await;
    let client = common::client();

    let res = client
        .delete(gate.url("/api/boards/1"))
        .header(COOKIE, "feedvote-csrf-token=abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    gate.stop().await;
}

#[tokio::test]
async fn test_first_write_without_cookie_is_allowed_and_issued_one_token() {
    let gate = common::start_gate(GateConfig::default(), Arc::new(SystemClock)).await;
    let client = common::client();

    let res = client
        .post(gate.url("/auth/signup"))
        .header("x-csrf-token", "whatever")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(common::csrf_cookies(&res).len(), 1);

    gate.stop().await;
}

#[tokio::test]
async fn test_safe_requests_pass_regardless_of_tokens() {
    let gate = common::start_gate(GateConfig::default(), Arc::new(SystemClock)).await;
    let client = common::client();

    // Mismatched pair on a safe method: allowed, cookie left alone.
    let res = client
        .get(gate.url("/api/boards"))
        .header(COOKIE, "feedvote-csrf-token=abc")
        .header("x-csrf-token", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(common::csrf_cookies(&res).is_empty());

    // No cookie at all: allowed and handed a token.
    let res = client.get(gate.url("/api/boards")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(common::csrf_cookies(&res).len(), 1);

    gate.stop().await;
}

#[tokio::test]
async fn test_production_cookie_is_secure() {
    let mut config = GateConfig::default();
    config.environment = feedvote_gate::config::Environment::Production;
    let gate = common::start_gate(config, Arc::new(SystemClock)).await;

    let res = common::client().get(gate.url("/csrf-token")).send().await.unwrap();
    let set_cookie = res.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.ends_with("; Secure"));

    gate.stop().await;
}

#[tokio::test]
async fn test_health_and_request_id() {
    let gate = common::start_gate(GateConfig::default(), Arc::new(SystemClock)).await;
    let client = common::client();

    let res = client.get(gate.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-request-id").is_some());
    assert!(common::csrf_cookies(&res).is_empty());

    let res = client
        .get(gate.url("/health"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers().get("x-request-id").unwrap(), "trace-me");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");

    gate.stop().await;
}

#[tokio::test]
async fn test_oversized_body_is_rejected_before_the_gates() {
    let mut config = GateConfig::default();
    config.listener.max_body_size = 16;
    let gate = common::start_gate(config, Arc::new(SystemClock)).await;
    let client = common::client();

    let res = client
        .post(gate.url("/api/boards"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(common::csrf_cookies(&res).is_empty());
    assert!(gate.state.api_limiter.store().is_empty());

    let res = client.post(gate.url("/api/boards")).body("small").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gate.stop().await;
}
