//! Stripe payment intents over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info};

use super::{PaymentError, PaymentGateway, PaymentIntent};
use crate::types::BillingRequest;

/// Gateway creating card payment intents for existing Stripe customers.
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<CustomerRef>,
}

#[derive(Debug, Deserialize)]
struct CustomerRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl StripeGateway {
    /// Create a new Stripe gateway.
    pub fn new(api_base: &str, secret_key: &str) -> Result<Self, PaymentError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    async fn find_customer(&self, email: &str) -> Result<String, PaymentError> {
        let url = format!("{}/v1/customers", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await?;

        let customers: CustomerList = ensure_success(response).await?.json().await?;
        customers
            .data
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| PaymentError::CustomerNotFound(email.to_string()))
    }
}

/// Form body for `POST /v1/payment_intents`.
fn intent_form(request: &BillingRequest, customer_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("amount", request.amount.to_string()),
        ("currency", request.currency.to_lowercase()),
        ("customer", customer_id.to_string()),
        ("payment_method_types[]", "card".to_string()),
        ("description", format!("Billing for {}", request.username)),
    ]
}

/// Map a non-2xx Stripe response body to an error.
fn provider_error(status: u16, body: &str) -> PaymentError {
    let message = serde_json::from_str::<StripeErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| body.to_string());

    if status == 402 {
        PaymentError::Declined(message)
    } else {
        PaymentError::Provider { status, message }
    }
}

async fn ensure_success(response: Response) -> Result<Response, PaymentError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(provider_error(status, &body))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_payment_intent(&self, request: &BillingRequest) -> Result<PaymentIntent, PaymentError> {
        let customer_id = self.find_customer(&request.email).await?;
        debug!(customer_id = %customer_id, "Resolved Stripe customer");

        let url = format!("{}/v1/payment_intents", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&intent_form(request, &customer_id))
            .send()
            .await?;

        let intent: StripePaymentIntent = ensure_success(response).await?.json().await?;
        info!(payment_intent_id = %intent.id, amount = request.amount, "Stripe payment intent created");

        Ok(PaymentIntent {
            client_secret: intent.client_secret.unwrap_or_default(),
            id: intent.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_form_fields() {
        let request = BillingRequest::new("alice", "a@x.com", 13000).with_currency("EUR");
        let form = intent_form(&request, "cus_123");

        assert!(form.contains(&("amount", "13000".to_string())));
        assert!(form.contains(&("currency", "eur".to_string())));
        assert!(form.contains(&("customer", "cus_123".to_string())));
        assert!(form.contains(&("payment_method_types[]", "card".to_string())));
        assert!(form.contains(&("description", "Billing for alice".to_string())));
    }

    #[test]
    fn test_card_errors_map_to_declined() {
        let body = r#"{"error": {"type": "card_error", "message": "Your card was declined."}}"#;
        match provider_error(402, body) {
            PaymentError::Declined(message) => assert_eq!(message, "Your card was declined."),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_error_body_is_kept() {
        match provider_error(500, "upstream timeout") {
            PaymentError::Provider { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream timeout");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let gateway = StripeGateway::new("https://api.stripe.com/", "sk_test").unwrap();
        assert_eq!(gateway.api_base, "https://api.stripe.com");
    }
}
