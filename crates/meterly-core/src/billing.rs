//! Billing records: users, billing history, checkout sessions and customers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Checkout status recorded when a subscribe action starts.
pub const CHECKOUT_PENDING: &str = "pending";

/// A registered user, as far as billing needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Email sent to the provider at checkout.
    pub email: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// One charge, appended per `subscription.paid` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingHistoryEntry {
    /// Local row id.
    pub id: i64,
    /// Charged user.
    pub user_id: UserId,
    /// Provider subscription id.
    pub subscription_id: Option<String>,
    /// Amount in minor currency units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Charge status as reported by the provider.
    pub status: String,
    /// Product description.
    pub description: String,
    /// Collection method.
    pub payment_method: String,
    /// Invoice link, if any.
    pub invoice_url: Option<String>,
    /// Receipt link, if any.
    pub receipt_url: Option<String>,
    /// Billing type (e.g. "recurring").
    pub billing_type: Option<String>,
    /// Billing period label.
    pub billing_period: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Values for appending a billing history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBillingEntry {
    /// Charged user.
    pub user_id: UserId,
    /// Provider subscription id.
    pub subscription_id: Option<String>,
    /// Amount in minor currency units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Charge status.
    pub status: String,
    /// Product description.
    pub description: String,
    /// Collection method.
    pub payment_method: String,
    /// Billing type.
    pub billing_type: Option<String>,
    /// Billing period label.
    pub billing_period: Option<String>,
}

/// A checkout started by the subscribe action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Local row id.
    pub id: i64,
    /// User who started the checkout.
    pub user_id: UserId,
    /// Correlation id shared with the provider (`req_<userId>_<millis>`).
    pub request_id: String,
    /// Hosted checkout URL.
    pub checkout_url: Option<String>,
    /// Provider checkout id.
    pub checkout_id: Option<String>,
    /// Provider order id.
    pub order_id: Option<String>,
    /// Provider customer id.
    pub customer_id: Option<String>,
    /// Provider subscription id.
    pub subscription_id: Option<String>,
    /// Provider product id.
    pub product_id: Option<String>,
    /// `pending` until the provider reports otherwise.
    pub status: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Values for inserting a checkout session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckoutSession {
    /// User who started the checkout.
    pub user_id: UserId,
    /// Correlation id.
    pub request_id: String,
    /// Hosted checkout URL.
    pub checkout_url: Option<String>,
    /// Provider checkout id.
    pub checkout_id: Option<String>,
    /// Provider product id.
    pub product_id: Option<String>,
    /// Initial status.
    pub status: String,
}

/// Provider ids learned when a checkout completes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckoutCompletion {
    /// Status reported by the provider.
    pub status: String,
    /// Provider checkout id.
    pub checkout_id: Option<String>,
    /// Provider order id.
    pub order_id: Option<String>,
    /// Provider customer id.
    pub customer_id: Option<String>,
    /// Provider subscription id.
    pub subscription_id: Option<String>,
    /// Provider product id.
    pub product_id: Option<String>,
}

/// The link between a user and a payment-provider customer.
///
/// Unique on `(user_id, provider)` and on `(provider, customer_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Local row id.
    pub id: i64,
    /// Linked user.
    pub user_id: UserId,
    /// Provider name.
    pub provider: String,
    /// Provider customer id.
    pub customer_id: String,
    /// Email on file at the provider.
    pub customer_email: Option<String>,
    /// Name on file at the provider.
    pub customer_name: Option<String>,
    /// Country on file at the provider.
    pub country: Option<String>,
    /// Checkout metadata.
    pub metadata: serde_json::Value,
    /// Cleared on explicit removal.
    pub is_active: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Values for inserting or refreshing a customer link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerUpsert {
    /// Linked user (only used on insert).
    pub user_id: UserId,
    /// Provider name.
    pub provider: String,
    /// Provider customer id (the upsert key).
    pub customer_id: String,
    /// Email.
    pub customer_email: Option<String>,
    /// Name.
    pub customer_name: Option<String>,
    /// Country (only used on insert).
    pub country: Option<String>,
    /// Checkout metadata.
    pub metadata: serde_json::Value,
}
