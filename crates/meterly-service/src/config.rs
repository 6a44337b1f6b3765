//! Service configuration.

use serde::Deserialize;
use std::path::Path;

use meterly_core::{DEFAULT_PREMIUM_CREDITS, DEFAULT_ULTIMATE_CREDITS};

/// Default Creem API endpoint.
pub const DEFAULT_CREEM_API_ENDPOINT: &str = "https://api.creem.io";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string; `None` runs on the in-memory store.
    pub database_url: Option<String>,

    /// Maximum pooled database connections.
    pub database_max_connections: u32,

    /// HS256 secret used to validate session JWTs.
    pub auth_jwt_secret: Option<String>,

    /// Accept the `x-user-id` header from a trusted fronting proxy.
    pub trust_user_header: bool,

    /// Creem API base URL.
    pub creem_api_endpoint: String,

    /// Creem API key (also the redirect signature salt).
    pub creem_api_key: Option<String>,

    /// Creem webhook HMAC secret.
    pub creem_webhook_secret: Option<String>,

    /// Creem product sold as the premium tier.
    pub premium_product_id: Option<String>,

    /// Creem product sold as the ultimate tier.
    pub ultimate_product_id: Option<String>,

    /// Credits granted per premium period.
    pub premium_credits: i64,

    /// Credits granted per ultimate period.
    pub ultimate_credits: i64,

    /// Frontend base URL for checkout success redirects.
    pub base_url: String,

    /// Use the guarded consume so concurrent requests cannot overdraw.
    pub quota_strict_consume: bool,

    /// Serve metered endpoints from the mock adapter unless a key is supplied.
    pub ai_demo_mode: bool,

    /// Adapter used when the request does not name one.
    pub ai_default_provider: String,

    /// Model used when the request does not name one.
    pub ai_default_model: String,

    /// OpenAI-compatible API key.
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible base URL.
    pub openai_base_url: String,

    /// Base URL that file keys are resolved against for file parsing.
    pub file_base_url: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Timeout for routes that call the payment provider.
    pub payment_timeout_seconds: u64,
}

/// Creem secrets file structure.
#[derive(Debug, Deserialize)]
struct CreemSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
    #[serde(default)]
    api_endpoint: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (creem_api_key, creem_webhook_secret, creem_api_endpoint) = load_creem_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            trust_user_header: env_flag("TRUST_USER_HEADER"),
            creem_api_endpoint: creem_api_endpoint
                .unwrap_or_else(|| DEFAULT_CREEM_API_ENDPOINT.into()),
            creem_api_key,
            creem_webhook_secret,
            premium_product_id: std::env::var("CREEM_PREMIUM_PRODUCT_ID").ok(),
            ultimate_product_id: std::env::var("CREEM_ULTIMATE_PRODUCT_ID").ok(),
            premium_credits: env_parse("PLAN_PREMIUM_CREDITS").unwrap_or(DEFAULT_PREMIUM_CREDITS),
            ultimate_credits: env_parse("PLAN_ULTIMATE_CREDITS")
                .unwrap_or(DEFAULT_ULTIMATE_CREDITS),
            base_url: std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            quota_strict_consume: env_flag("QUOTA_STRICT_CONSUME"),
            ai_demo_mode: env_flag("AI_DEMO_MODE"),
            ai_default_provider: std::env::var("AI_DEFAULT_PROVIDER")
                .unwrap_or_else(|_| "openai".into()),
            ai_default_model: std::env::var("AI_DEFAULT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".into()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            file_base_url: std::env::var("FILE_BASE_URL").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS").unwrap_or(30),
            payment_timeout_seconds: env_parse("PAYMENT_TIMEOUT_SECONDS").unwrap_or(60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
}

/// Load Creem secrets from file or environment.
fn load_creem_secrets() -> (Option<String>, Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/creem.json",
        "meterly/.secrets/creem.json",
        "../.secrets/creem.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<CreemSecrets>(path) {
            tracing::info!(path = %path, "Loaded Creem secrets from file");
            return (
                Some(secrets.api_key),
                secrets.webhook_secret,
                secrets
                    .api_endpoint
                    .or_else(|| std::env::var("CREEM_API_ENDPOINT").ok()),
            );
        }
    }

    tracing::debug!("Creem secrets file not found, using environment variables");
    (
        std::env::var("CREEM_API_KEY").ok(),
        std::env::var("CREEM_WEBHOOK_SECRET").ok(),
        std::env::var("CREEM_API_ENDPOINT").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            auth_jwt_secret: None,
            trust_user_header: false,
            creem_api_endpoint: DEFAULT_CREEM_API_ENDPOINT.into(),
            creem_api_key: None,
            creem_webhook_secret: None,
            premium_product_id: None,
            ultimate_product_id: None,
            premium_credits: DEFAULT_PREMIUM_CREDITS,
            ultimate_credits: DEFAULT_ULTIMATE_CREDITS,
            base_url: "http://localhost:3000".into(),
            quota_strict_consume: false,
            ai_demo_mode: false,
            ai_default_provider: "openai".into(),
            ai_default_model: "gpt-4o-mini".into(),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            file_base_url: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            payment_timeout_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.creem_api_endpoint, "https://api.creem.io");
        assert_eq!(config.premium_credits, 1000);
        assert_eq!(config.ultimate_credits, 5000);
        assert_eq!(config.payment_timeout_seconds, 60);
        assert!(!config.quota_strict_consume);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn secrets_file_parses() {
        let secrets: CreemSecrets =
            serde_json::from_str(r#"{"api_key":"creem_test","webhook_secret":"whsec"}"#).unwrap();
        assert_eq!(secrets.api_key, "creem_test");
        assert_eq!(secrets.webhook_secret.as_deref(), Some("whsec"));
        assert!(secrets.api_endpoint.is_none());
    }
}
