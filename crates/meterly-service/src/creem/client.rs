//! Creem API client implementation.

use reqwest::Client;
use std::time::Duration;

use super::types::{
    Checkout, CreateCheckoutRequest, CreemErrorResponse, RedirectParams, Subscription,
};
use crate::crypto::{constant_time_eq, hmac_sha256_hex, sha256_hex};

/// Error type for Creem operations.
#[derive(Debug, thiserror::Error)]
pub enum CreemError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Creem API returned an error.
    #[error("Creem API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Invalid webhook or redirect signature.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Creem API client.
#[derive(Debug, Clone)]
pub struct CreemClient {
    client: Client,
    base_url: String,
    api_key: String,
    webhook_secret: Option<String>,
}

impl CreemClient {
    /// Create a new Creem client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API endpoint (`https://api.creem.io` or the test-mode host)
    /// * `api_key` - Creem API key, also the redirect signature salt
    /// * `webhook_secret` - Optional webhook signing secret
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        webhook_secret: Option<String>,
    ) -> Result<Self, CreemError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            webhook_secret,
        })
    }

    /// Create a hosted checkout for a product.
    pub async fn create_checkout(
        &self,
        request: &CreateCheckoutRequest,
    ) -> Result<Checkout, CreemError> {
        tracing::debug!(
            product_id = %request.product_id,
            request_id = %request.request_id,
            "Creating Creem checkout"
        );

        let response = self
            .client
            .post(format!("{}/v1/checkouts", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Retrieve a checkout by id.
    pub async fn get_checkout(&self, checkout_id: &str) -> Result<Checkout, CreemError> {
        let response = self
            .client
            .get(format!("{}/v1/checkouts", self.base_url))
            .header("x-api-key", &self.api_key)
            .query(&[("checkout_id", checkout_id)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Cancel a subscription immediately.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Subscription, CreemError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/subscriptions/{}/cancel",
                self.base_url, subscription_id
            ))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Verify a webhook signature.
    ///
    /// # Arguments
    ///
    /// * `payload` - Raw request body
    /// * `signature` - Value of the `creem-signature` header (hex HMAC-SHA256)
    pub fn verify_webhook_signature(&self, payload: &str, signature: &str) -> Result<(), CreemError> {
        let secret = self
            .webhook_secret
            .as_ref()
            .ok_or_else(|| CreemError::Configuration("Webhook secret not configured".into()))?;

        let expected = hmac_sha256_hex(secret, payload).ok_or(CreemError::InvalidSignature)?;

        if constant_time_eq(&expected, signature) {
            Ok(())
        } else {
            Err(CreemError::InvalidSignature)
        }
    }

    /// Verify the signature Creem appends to the checkout success redirect.
    pub fn verify_redirect_signature(
        &self,
        params: &RedirectParams,
        signature: &str,
    ) -> Result<(), CreemError> {
        let expected = sha256_hex(&params.signing_string(&self.api_key));

        if constant_time_eq(&expected, signature) {
            Ok(())
        } else {
            Err(CreemError::InvalidSignature)
        }
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CreemError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<CreemErrorResponse, _> = response.json().await;

        match error_body {
            Ok(creem_error) => Err(CreemError::Api {
                status: status.as_u16(),
                message: creem_error.message_text(),
            }),
            Err(_) => Err(CreemError::Api {
                status: status.as_u16(),
                message: format!("HTTP {status}"),
            }),
        }
    }
}
