//! Common test utilities for meterly integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue};
use axum_test::{TestRequest, TestServer};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use wiremock::MockServer;

use meterly_core::{ConsumeGuard, NewUsageLedger, QuotaCost, UsageLedger, UserId};
use meterly_service::auth::JwtClaims;
use meterly_service::crypto::hmac_sha256_hex;
use meterly_service::{create_router_with_state, AppState, ServiceConfig};
use meterly_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const CREEM_API_KEY: &str = "creem_test_key";
pub const PREMIUM_PRODUCT: &str = "prod_premium";
pub const ULTIMATE_PRODUCT: &str = "prod_ultimate";
pub const PREMIUM_CREDITS: i64 = 500;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The in-memory store behind the server, for direct assertions.
    pub store: Arc<MemoryStore>,
    /// Shared application state.
    pub state: Arc<AppState>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// Stands in for Creem (and anything else reachable over HTTP).
    pub mock: MockServer,
}

pub fn base_config(mock_uri: &str) -> ServiceConfig {
    ServiceConfig {
        auth_jwt_secret: Some(JWT_SECRET.into()),
        creem_api_endpoint: mock_uri.into(),
        creem_api_key: Some(CREEM_API_KEY.into()),
        creem_webhook_secret: Some(WEBHOOK_SECRET.into()),
        premium_product_id: Some(PREMIUM_PRODUCT.into()),
        ultimate_product_id: Some(ULTIMATE_PRODUCT.into()),
        premium_credits: PREMIUM_CREDITS,
        base_url: "https://app.example.com".into(),
        ai_demo_mode: true,
        file_base_url: Some(format!("{mock_uri}/files")),
        ..ServiceConfig::default()
    }
}

impl TestHarness {
    /// Create a harness with the default test configuration.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut ServiceConfig)) -> Self {
        let mock = MockServer::start().await;
        let mut config = base_config(&mock.uri());
        customize(&mut config);

        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(store.clone(), config));
        state.seed_plans().await.expect("seed plans");

        let server = TestServer::new(create_router_with_state(state.clone()))
            .expect("Failed to create test server");

        Self {
            server,
            store,
            state,
            test_user_id: UserId::generate(),
            mock,
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> HeaderValue {
        auth_header_for(&self.test_user_id)
    }

    pub fn get(&self, path: &str) -> TestRequest {
        self.server
            .get(path)
            .add_header(AUTHORIZATION, self.user_auth_header())
    }

    pub fn post(&self, path: &str) -> TestRequest {
        self.server
            .post(path)
            .add_header(AUTHORIZATION, self.user_auth_header())
    }

    /// Register the test user through the API (free tier included).
    pub async fn create_account(&self) {
        self.post("/api/accounts")
            .json(&json!({"email": "ada@example.com", "name": "Ada"}))
            .await
            .assert_status_ok();
    }

    /// POST a signed webhook body.
    pub async fn send_webhook(&self, event: &Value) -> axum_test::TestResponse {
        let body = event.to_string();
        let signature = sign(&body);
        self.server
            .post("/api/payment/webhook")
            .add_header(
                HeaderName::from_static("creem-signature"),
                HeaderValue::from_str(&signature).unwrap(),
            )
            .text(body)
            .await
    }

    /// Insert a ledger directly, bypassing the API.
    pub async fn seed_ledger(&self, total: i64, used: i64, expired: bool) -> UsageLedger {
        let now = Utc::now();
        let end = if expired {
            now - Duration::days(1)
        } else {
            now + Duration::days(30)
        };
        let ledger = self
            .store
            .insert_usage(&NewUsageLedger::paid(
                self.test_user_id,
                "sub_seed",
                total,
                now - Duration::days(30),
                end,
            ))
            .await
            .unwrap();
        if used > 0 {
            self.store
                .consume_credits(
                    ledger.id,
                    QuotaCost { text: used, image: 0 },
                    ConsumeGuard::Unchecked,
                )
                .await
                .unwrap();
        }
        self.current_ledger().await
    }

    pub async fn current_ledger(&self) -> UsageLedger {
        self.store
            .latest_usage(&self.test_user_id)
            .await
            .unwrap()
            .expect("ledger")
    }
}

pub fn auth_header_for(user_id: &UserId) -> HeaderValue {
    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        exp: now + 3600,
        iat: Some(now),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

pub fn sign(body: &str) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET, body).unwrap()
}

/// A `subscription.paid` event for `user_id`.
pub fn paid_event(user_id: &UserId, subscription_id: &str, product_id: &str) -> Value {
    let now = Utc::now();
    json!({
        "id": format!("evt_{subscription_id}"),
        "eventType": "subscription.paid",
        "object": {
            "id": subscription_id,
            "status": "active",
            "collection_method": "charge_automatically",
            "current_period_start_date": now,
            "current_period_end_date": now + Duration::days(30),
            "metadata": {"userId": user_id.to_string(), "plan": "premium"},
            "product": {
                "id": product_id,
                "price": 900,
                "currency": "USD",
                "status": "active",
                "description": "Premium plan",
                "billing_type": "recurring",
                "billing_period": "every-month"
            }
        }
    })
}
