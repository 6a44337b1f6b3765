//! Metered AI endpoint integration tests: quota gate, telemetry and
//! visitor rate limiting.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use common::TestHarness;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use meterly_store::Store;

fn visitor(id: &'static str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-visitor-id"),
        HeaderValue::from_static(id),
    )
}

fn chat_body() -> Value {
    json!({"messages": [{"role": "user", "content": "hello"}]})
}

// ============================================================================
// Chat
// ============================================================================

#[tokio::test]
async fn chat_consumes_one_credit_and_records_tokens() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 0, false).await;

    let response = harness.post("/api/ai/chat").json(&chat_body()).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["content"], "Mock reply: hello");
    assert_eq!(body["data"]["model"], "mock-model");

    let ledger = harness.current_ledger().await;
    assert_eq!(ledger.credit_used, 1);
    assert_eq!(ledger.text_used, 1);

    let telemetry = harness
        .store
        .list_token_usage(&harness.test_user_id)
        .await
        .unwrap();
    assert_eq!(telemetry.len(), 1);
    assert_eq!(telemetry[0].usage.endpoint, "chat");
    assert_eq!(telemetry[0].usage.provider, "mock");
}

#[tokio::test]
async fn chat_at_the_boundary_then_exceeded() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 9, false).await;

    harness
        .post("/api/ai/chat")
        .json(&chat_body())
        .await
        .assert_status_ok();
    assert_eq!(harness.current_ledger().await.credit_used, 10);

    let response = harness.post("/api/ai/chat").json(&chat_body()).await;

    assert_eq!(response.status_code(), StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"], "quota.exceeded");
    assert_eq!(harness.current_ledger().await.credit_used, 10);
}

#[tokio::test]
async fn chat_on_expired_period_is_rejected() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(100, 0, true).await;

    let response = harness.post("/api/ai/chat").json(&chat_body()).await;

    assert_eq!(response.status_code(), StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"], "quota.expired");
    assert_eq!(harness.current_ledger().await.credit_used, 0);
}

#[tokio::test]
async fn chat_without_ledger_is_quota_not_found() {
    let harness = TestHarness::new().await;

    let response = harness.post("/api/ai/chat").json(&chat_body()).await;

    assert_eq!(response.status_code(), StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"], "quota.notFound");
}

#[tokio::test]
async fn chat_rejects_empty_messages() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 0, false).await;

    let response = harness
        .post("/api/ai/chat")
        .json(&json!({"messages": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "ai.invalid_request");
    assert_eq!(harness.current_ledger().await.credit_used, 0);
}

#[tokio::test]
async fn chat_requires_auth() {
    let harness = TestHarness::new().await;

    let response = harness.server.post("/api/ai/chat").json(&chat_body()).await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upstream_failure_charges_nothing() {
    let harness = TestHarness::with_config(|config| {
        config.ai_demo_mode = false;
        config.openai_api_key = Some("sk-test".into());
    })
    .await;
    // Point the OpenAI adapter at the mock server through the request override.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"message": "overloaded"}
        })))
        .mount(&harness.mock)
        .await;
    harness.seed_ledger(10, 0, false).await;

    let response = harness
        .post("/api/ai/chat")
        .add_header(
            HeaderName::from_static("x-llm-base-url"),
            HeaderValue::from_str(&format!("{}/v1", harness.mock.uri())).unwrap(),
        )
        .json(&chat_body())
        .await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["error"], "ai.provider_error");
    assert_eq!(harness.current_ledger().await.credit_used, 0);
}

// ============================================================================
// Image
// ============================================================================

#[tokio::test]
async fn image_consumes_three_credits() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 0, false).await;

    let response = harness
        .post("/api/ai/image")
        .json(&json!({"prompt": "a <red> fox", "size": "256x256"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["data"]["url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/svg+xml;base64,"));

    let ledger = harness.current_ledger().await;
    assert_eq!(ledger.credit_used, 3);
    assert_eq!(ledger.image_used, 3);
    assert_eq!(ledger.text_used, 0);

    let telemetry = harness
        .store
        .list_token_usage(&harness.test_user_id)
        .await
        .unwrap();
    assert_eq!(telemetry[0].usage.endpoint, "image");
    assert_eq!(telemetry[0].usage.model.as_deref(), Some("image-gen"));
}

#[tokio::test]
async fn image_needs_three_credits_left() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 8, false).await;

    let response = harness
        .post("/api/ai/image")
        .json(&json!({"prompt": "fox"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(harness.current_ledger().await.credit_used, 8);
}

#[tokio::test]
async fn image_requires_prompt() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 0, false).await;

    let response = harness.post("/api/ai/image").json(&json!({})).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// File parse
// ============================================================================

#[tokio::test]
async fn file_parse_extracts_truncated_text() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 0, false).await;

    Mock::given(method("GET"))
        .and(path("/files/notes.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(13_000)))
        .mount(&harness.mock)
        .await;

    let response = harness
        .post("/api/ai/file-parse")
        .json(&json!({"fileKey": "notes.txt", "task": "extract_text"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["text"].as_str().unwrap().len(), 12_000);
    assert_eq!(harness.current_ledger().await.credit_used, 1);
}

#[tokio::test]
async fn file_parse_summarizes_by_default() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 0, false).await;

    Mock::given(method("GET"))
        .and(path("/files/report.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("quarterly numbers"))
        .mount(&harness.mock)
        .await;

    let response = harness
        .post("/api/ai/file-parse")
        .json(&json!({"fileKey": "report.txt"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let summary = body["data"]["summary"].as_str().unwrap();
    assert!(summary.contains("quarterly numbers"));
    assert!(body["data"]["usage"]["totalTokens"].as_i64().unwrap() > 0);

    let telemetry = harness
        .store
        .list_token_usage(&harness.test_user_id)
        .await
        .unwrap();
    assert_eq!(telemetry[0].usage.endpoint, "file-parse");
    assert_eq!(harness.current_ledger().await.credit_used, 1);
}

#[tokio::test]
async fn file_parse_download_failure_charges_nothing() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(10, 0, false).await;

    Mock::given(method("GET"))
        .and(path("/files/missing.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.mock)
        .await;

    let response = harness
        .post("/api/ai/file-parse")
        .json(&json!({"fileKey": "missing.txt"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "files.download_failed");
    assert_eq!(harness.current_ledger().await.credit_used, 0);
}

// ============================================================================
// Visitor rate limiting
// ============================================================================

#[tokio::test]
async fn image_rate_limit_returns_429_with_headers() {
    let harness = TestHarness::new().await;
    harness.seed_ledger(1000, 0, false).await;

    for _ in 0..10 {
        let (name, value) = visitor("visitor-a");
        harness
            .post("/api/ai/image")
            .add_header(name, value)
            .json(&json!({"prompt": "fox"}))
            .await
            .assert_status_ok();
    }

    let (name, value) = visitor("visitor-a");
    let response = harness
        .post("/api/ai/image")
        .add_header(name, value)
        .json(&json!({"prompt": "fox"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json();
    assert_eq!(body["error"], "rate_limit.exceeded");
    let headers = response.headers();
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "10");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    assert!(headers.get("retry-after").is_some());
    assert_eq!(harness.current_ledger().await.credit_used, 30);

    // Another visitor has its own window.
    let (name, value) = visitor("visitor-b");
    harness
        .post("/api/ai/image")
        .add_header(name, value)
        .json(&json!({"prompt": "fox"}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn rate_limit_applies_before_auth() {
    let harness = TestHarness::new().await;

    for _ in 0..20 {
        let (name, value) = visitor("visitor-c");
        let response = harness
            .server
            .post("/api/ai/chat")
            .add_header(name, value)
            .json(&chat_body())
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    let (name, value) = visitor("visitor-c");
    let response = harness
        .server
        .post("/api/ai/chat")
        .add_header(name, value)
        .json(&chat_body())
        .await;
    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
}
