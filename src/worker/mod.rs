//! Billing worker: consumes billing requests, charges them and reports results.

mod billing_worker;
mod lifecycle;
mod processor;

pub use billing_worker::BillingWorker;
pub use lifecycle::WorkerHandle;
pub use processor::BillingProcessor;
