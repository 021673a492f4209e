//! Subscription types used by the daily payment scan.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Subscription plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    Basic,
    Pro,
    Ultimate,
}

/// A stored subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: u64,
    /// Reference to the owning user
    pub user_id: u64,
    pub plan: PlanType,
    pub next_payment_date: NaiveDate,
    /// Price in major currency units
    pub price: f64,
}

/// Request body for creating a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub user_id: u64,
    pub plan: PlanType,
    pub next_payment_date: NaiveDate,
    pub price: f64,
}

impl Subscription {
    pub fn is_due_on(&self, date: NaiveDate) -> bool {
        self.next_payment_date == date
    }
}
