//! Billing provider integration.

pub mod api;

pub use api::BillingApi;
