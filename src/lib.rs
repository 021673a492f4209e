//! Billing Relay Library
//!
//! Accepts billing requests over HTTP, relays them through a durable RabbitMQ
//! queue to a reconnecting payment worker, and publishes the outcome to a
//! results queue. Also runs a daily scan of subscriptions due for payment.

pub mod api;
pub mod auth;
pub mod error;
pub mod jobs;
pub mod messaging;
pub mod payment;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use error::{RelayError, Result};
pub use messaging::{AmqpBroker, EventPublisher, HealthProbe};
pub use types::{BillingRequest, BillingResult, EventEnvelope, EventType, RelayConfig};
pub use worker::{BillingProcessor, BillingWorker, WorkerHandle};

/// Queue carrying enveloped billing requests.
pub const BILLING_REQUESTS_QUEUE: &str = "billing_requests";

/// Queue carrying bare billing results.
pub const BILLING_RESULTS_QUEUE: &str = "billing_results";

/// AMQP port of the broker. Not configurable.
pub const BROKER_PORT: u16 = 5672;

/// Default wait between worker reconnect attempts, in seconds
pub const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 5;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default currency for billing requests
pub const DEFAULT_CURRENCY: &str = "eur";
