//! Identifier types for meterly.
//!
//! User identifiers are UUIDs issued by the auth subsystem. Provider-facing
//! identifiers (subscription ids, checkout request ids) are opaque strings;
//! this module owns the two formats meterly generates itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of synthetic subscription ids minted for the free tier.
pub const FREE_SUBSCRIPTION_PREFIX: &str = "free_";

/// Prefix of client-generated checkout correlation ids.
pub const CHECKOUT_REQUEST_PREFIX: &str = "req_";

/// A user identifier (UUID format from the auth subsystem).
///
/// User ids are extracted from the session JWT `sub` claim.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(uuid::Uuid);

impl UserId {
    /// Create a new identifier from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random identifier (primarily for testing).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0.to_string()
    }
}

/// Build the synthetic subscription id for a free-tier grant: `free_<millis>`.
#[must_use]
pub fn free_subscription_id(at: DateTime<Utc>) -> String {
    format!("{FREE_SUBSCRIPTION_PREFIX}{}", at.timestamp_millis())
}

/// Whether a subscription id was minted by [`free_subscription_id`].
#[must_use]
pub fn is_free_subscription_id(subscription_id: &str) -> bool {
    subscription_id.starts_with(FREE_SUBSCRIPTION_PREFIX)
}

/// Build the checkout correlation id: `req_<userId>_<millis>`.
#[must_use]
pub fn checkout_request_id(user_id: &UserId, at: DateTime<Utc>) -> String {
    format!(
        "{CHECKOUT_REQUEST_PREFIX}{user_id}_{}",
        at.timestamp_millis()
    )
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,
}
