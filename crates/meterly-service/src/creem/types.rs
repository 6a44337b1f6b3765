//! Creem API types.
//!
//! Creem's REST API speaks `snake_case`; some SDKs and replayed payloads use
//! `camelCase`, so the fields that matter accept both spellings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A field Creem returns either as a bare id or as the expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    /// Only the id.
    Id(String),
    /// The full object.
    Object(T),
}

impl<T: HasId> Expandable<T> {
    /// The referenced id, whichever form was sent.
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object(obj) => obj.id(),
        }
    }

    /// The expanded object, if one was sent.
    pub fn object(&self) -> Option<&T> {
        match self {
            Self::Id(_) => None,
            Self::Object(obj) => Some(obj),
        }
    }
}

/// Objects addressable by id.
pub trait HasId {
    /// The object's id.
    fn id(&self) -> &str;
}

macro_rules! has_id {
    ($($ty:ty),*) => {
        $(impl HasId for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

has_id!(Order, Customer, Product, Subscription);

/// Webhook envelope: `{ eventType, object }`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event id.
    #[serde(default)]
    pub id: Option<String>,
    /// Event type (e.g. `subscription.paid`).
    #[serde(rename = "eventType", alias = "event_type")]
    pub event_type: String,
    /// Event payload; its shape depends on `event_type`.
    #[serde(default)]
    pub object: serde_json::Value,
}

/// Metadata meterly attaches to every checkout.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CheckoutMetadata {
    /// Internal user id.
    #[serde(rename = "userId", alias = "user_id", default)]
    pub user_id: Option<String>,
    /// User email.
    #[serde(default)]
    pub email: Option<String>,
    /// User display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Purchased plan tier.
    #[serde(default)]
    pub plan: Option<String>,
}

impl CheckoutMetadata {
    /// Read the known keys out of a raw metadata object.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Creem order object.
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// Order id.
    pub id: String,
}

/// Creem customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Customer id.
    pub id: String,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
    /// Customer name.
    #[serde(default)]
    pub name: Option<String>,
    /// Two-letter country code.
    #[serde(default)]
    pub country: Option<String>,
}

/// Creem product object.
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    /// Product id.
    pub id: String,
    /// Price in minor units.
    #[serde(default)]
    pub price: i64,
    /// Currency code.
    #[serde(default)]
    pub currency: String,
    /// Product status.
    #[serde(default)]
    pub status: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// `recurring` or `onetime`.
    #[serde(alias = "billingType", default)]
    pub billing_type: Option<String>,
    /// Billing period (e.g. `every-month`).
    #[serde(alias = "billingPeriod", default)]
    pub billing_period: Option<String>,
}

/// Creem subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription id.
    pub id: String,
    /// Subscribed product.
    #[serde(default)]
    pub product: Option<Expandable<Product>>,
    /// Subscribing customer.
    #[serde(default)]
    pub customer: Option<Expandable<Customer>>,
    /// Collection method (e.g. `charge_automatically`).
    #[serde(alias = "collectionMethod", default)]
    pub collection_method: Option<String>,
    /// Provider status.
    #[serde(default)]
    pub status: String,
    /// Metadata copied from the checkout.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Start of the paid period.
    #[serde(alias = "currentPeriodStartDate", default)]
    pub current_period_start_date: Option<DateTime<Utc>>,
    /// End of the paid period.
    #[serde(alias = "currentPeriodEndDate", default)]
    pub current_period_end_date: Option<DateTime<Utc>>,
}

/// Creem checkout object.
#[derive(Debug, Clone, Deserialize)]
pub struct Checkout {
    /// Checkout id.
    pub id: String,
    /// Correlation id supplied at creation.
    #[serde(alias = "requestId", default)]
    pub request_id: Option<String>,
    /// Checkout status (e.g. `completed`).
    #[serde(default)]
    pub status: Option<String>,
    /// Hosted checkout page.
    #[serde(alias = "checkoutUrl", default)]
    pub checkout_url: Option<String>,
    /// Resulting order.
    #[serde(default)]
    pub order: Option<Expandable<Order>>,
    /// Paying customer.
    #[serde(default)]
    pub customer: Option<Expandable<Customer>>,
    /// Resulting subscription.
    #[serde(default)]
    pub subscription: Option<Expandable<Subscription>>,
    /// Purchased product.
    #[serde(default)]
    pub product: Option<Expandable<Product>>,
    /// Metadata supplied at creation.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Checkout {
    /// The known metadata keys.
    #[must_use]
    pub fn metadata(&self) -> CheckoutMetadata {
        CheckoutMetadata::from_value(&self.metadata)
    }
}

/// Customer block of a checkout request.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutCustomer {
    /// Prefilled email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// `POST /v1/checkouts` body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCheckoutRequest {
    /// Product to sell.
    pub product_id: String,
    /// Correlation id echoed back on completion.
    pub request_id: String,
    /// Where Creem redirects after payment.
    pub success_url: String,
    /// Metadata copied onto the checkout and subscription.
    pub metadata: CheckoutMetadata,
    /// Customer prefill.
    pub customer: CheckoutCustomer,
}

/// Query parameters Creem appends to the success redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    /// Correlation id.
    pub request_id: Option<String>,
    /// Checkout id.
    pub checkout_id: Option<String>,
    /// Order id.
    pub order_id: Option<String>,
    /// Customer id.
    pub customer_id: Option<String>,
    /// Subscription id.
    pub subscription_id: Option<String>,
    /// Product id.
    pub product_id: Option<String>,
    /// SHA-256 signature over the other parameters.
    pub signature: Option<String>,
}

impl RedirectParams {
    /// The string Creem signs: `key=value` pairs in fixed order joined by
    /// `|`, absent values as `null`, then `salt=<api key>`.
    #[must_use]
    pub fn signing_string(&self, salt: &str) -> String {
        let fields = [
            ("request_id", &self.request_id),
            ("checkout_id", &self.checkout_id),
            ("order_id", &self.order_id),
            ("customer_id", &self.customer_id),
            ("subscription_id", &self.subscription_id),
            ("product_id", &self.product_id),
        ];

        fields
            .iter()
            .map(|(key, value)| format!("{key}={}", value.as_deref().unwrap_or("null")))
            .chain(std::iter::once(format!("salt={salt}")))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Creem error body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreemErrorResponse {
    /// Short error name.
    #[serde(default)]
    pub error: Option<String>,
    /// Message or list of messages.
    #[serde(default)]
    pub message: serde_json::Value,
}

impl CreemErrorResponse {
    /// Flatten `message` into one line.
    #[must_use]
    pub fn message_text(&self) -> String {
        match &self.message {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            serde_json::Value::Null => self.error.clone().unwrap_or_default(),
            other => other.to_string(),
        }
    }
}
