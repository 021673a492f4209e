//! Payment provider integration.

mod simulated;
mod stripe;

pub use simulated::SimulatedGateway;
pub use stripe::StripeGateway;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::BillingRequest;

/// Errors returned by a payment provider call.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// No provider customer is registered for the email
    #[error("No customer found for {0}")]
    CustomerNotFound(String),

    /// The provider declined the charge
    #[error("Payment declined: {0}")]
    Declined(String),

    /// The provider returned an unexpected error status
    #[error("Payment provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// Transport failure calling the provider
    #[error("Payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A created payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// The external payment action performed for each billing request.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Get the name of this gateway.
    fn name(&self) -> &'static str;

    /// Create a card payment intent for the request's customer and amount.
    async fn create_payment_intent(&self, request: &BillingRequest) -> Result<PaymentIntent, PaymentError>;
}
