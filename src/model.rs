//! Wire and domain model for billing customer records.
//!
//! These types mirror the JSON shape the billing API returns. Records are
//! deserialized once during a bulk load and stored immutably in the snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription lifecycle states reported by the billing API.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Pending,
    Unpaid,
    /// Statuses introduced upstream that this build does not know about.
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }
}

/// A customer's subscription as reported by the billing API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Subscription {
    #[serde(default)]
    pub id: Option<u64>,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub plan_id: Option<u64>,
    #[serde(default)]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
}

/// A billing customer record.
///
/// `email` is the lookup key (compared case-insensitively); `id` is the
/// stable upstream identifier used to tell genuinely distinct subscriptions
/// apart when they share an email.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub customer_reference: Option<String>,
    pub subscription: Subscription,
}

/// One page of the paginated `/customers` listing.
#[derive(Deserialize, Debug)]
pub struct CustomerPage {
    pub customers: Vec<Customer>,
}
