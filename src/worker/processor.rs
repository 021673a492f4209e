//! Turns one request-queue message into a billing result.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::auth::UserVerifier;
use crate::payment::{PaymentError, PaymentGateway, PaymentIntent};
use crate::types::{BillingRequest, BillingResult, EventEnvelope, EventType, ValidationError};

/// Failures while charging a decoded request.
#[derive(Error, Debug)]
enum ChargeError {
    #[error("Invalid billing request: {0}")]
    Validation(#[from] ValidationError),

    #[error("User {0} could not be verified")]
    UnverifiedUser(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// Processor that performs the payment action for each billing message.
///
/// Never fails: every problem becomes an error-variant [`BillingResult`].
pub struct BillingProcessor {
    gateway: Arc<dyn PaymentGateway>,
    verifier: Option<Arc<dyn UserVerifier>>,
}

impl BillingProcessor {
    /// Create a new billing processor.
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            gateway,
            verifier: None,
        }
    }

    /// Verify every user with `verifier` before charging.
    pub fn with_verifier(mut self, verifier: Arc<dyn UserVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Process a raw message body from the request queue.
    pub async fn process(&self, body: &[u8]) -> BillingResult {
        let envelope = match EventEnvelope::from_bytes(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, bytes = body.len(), "Malformed billing message");
                return BillingResult::failure(email_from_raw(body), format!("Malformed message: {}", e));
            }
        };

        let email = envelope.data_field("email");

        if envelope.event_type != EventType::BillingRequest {
            warn!(event_type = %envelope.event_type, "Unsupported event on request queue");
            return BillingResult::failure(
                email,
                format!("Unsupported event type: {}", envelope.event_type),
            );
        }

        let request: BillingRequest = match envelope.payload() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Billing request payload could not be decoded");
                return BillingResult::failure(email, format!("Invalid billing request: {}", e));
            }
        };

        match self.charge(&request).await {
            Ok(intent) => {
                info!(
                    username = %request.username,
                    amount = request.amount,
                    gateway = self.gateway.name(),
                    "Payment intent created"
                );
                BillingResult::success(&request, intent.id, intent.client_secret)
            }
            Err(e) => {
                warn!(username = %request.username, error = %e, "Billing request failed");
                BillingResult::failure(Some(request.email.clone()), e)
            }
        }
    }

    async fn charge(&self, request: &BillingRequest) -> Result<PaymentIntent, ChargeError> {
        request.validate()?;

        if let Some(verifier) = &self.verifier {
            if !verifier.verify_user(&request.username).await {
                return Err(ChargeError::UnverifiedUser(request.username.clone()));
            }
        }

        Ok(self.gateway.create_payment_intent(request).await?)
    }
}

/// Pull `data.email` out of a body that is JSON but not a valid envelope.
fn email_from_raw(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("data")?.get("email")?.as_str().map(str::to_string)
}
