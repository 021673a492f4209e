//! Gateway that fabricates payment intents without calling a provider.

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{PaymentError, PaymentGateway, PaymentIntent};
use crate::types::BillingRequest;

/// Default gateway when no provider key is configured.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway;

impl SimulatedGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create_payment_intent(&self, request: &BillingRequest) -> Result<PaymentIntent, PaymentError> {
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let client_secret = format!("{}_secret_{}", id, Uuid::new_v4().simple());

        debug!(
            username = %request.username,
            amount = request.amount,
            currency = %request.currency,
            payment_intent_id = %id,
            "Simulated payment intent created"
        );

        Ok(PaymentIntent { id, client_secret })
    }
}
