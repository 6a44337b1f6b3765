//! Creem integration for hosted checkout and subscription billing.
//!
//! Creem handles:
//! - Hosted checkout pages for the paid tiers
//! - Recurring subscription billing
//! - Signed webhooks (`checkout.completed`, `subscription.*`)
//! - Signed success redirects back to the frontend

pub mod client;
pub mod types;

pub use client::{CreemClient, CreemError};
pub use types::*;
