//! Daily subscription payment scan.
//!
//! Once per interval the scan looks up subscriptions whose next payment date
//! is today and calls the payment endpoint for each of them.

mod daily_scan;
mod store;

pub use daily_scan::{DailyScan, HttpPaymentCaller, PaymentCaller, ScanReport};
pub use store::{InMemorySubscriptionStore, SubscriptionStore};
