//! Core types for the billing relay.

mod billing;
mod config;
mod envelope;
mod subscription;

pub use billing::{is_valid_email, BillingRequest, BillingResult, ValidationError};
pub use config::RelayConfig;
pub use envelope::{EventEnvelope, EventType};
pub use subscription::{NewSubscription, PlanType, Subscription};
