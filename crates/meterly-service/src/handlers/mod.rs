//! API handlers.

pub mod accounts;
pub mod ai;
pub mod health;
pub mod payment;
pub mod webhooks;
