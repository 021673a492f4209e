//! Billing request and result types.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DEFAULT_CURRENCY;

/// Reasons a billing request is rejected at the boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("username must not be empty")]
    EmptyUsername,

    #[error("value is not a valid email address: {0}")]
    InvalidEmail(String),

    #[error("amount must be greater than zero, got {0}")]
    NonPositiveAmount(i64),

    #[error("currency must be a three-letter code, got {0:?}")]
    InvalidCurrency(String),
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// A request to charge a user.
///
/// `amount` is in minor currency units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRequest {
    pub username: String,
    pub email: String,
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl BillingRequest {
    /// Create a request in the default currency.
    pub fn new(username: &str, email: &str, amount: i64) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            amount,
            currency: default_currency(),
        }
    }

    /// Set the currency.
    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_string();
        self
    }

    /// Check required fields, email syntax, amount and currency code.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.trim().is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        if !is_valid_email(&self.email) {
            return Err(ValidationError::InvalidEmail(self.email.clone()));
        }
        if self.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount(self.amount));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(self.currency.clone()));
        }
        Ok(())
    }
}

/// Check an address against a practical subset of RFC 5322.
pub fn is_valid_email(email: &str) -> bool {
    lazy_static::lazy_static! {
        static ref EMAIL: Regex = Regex::new(
            r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$"
        )
        .unwrap();
    }
    email.len() <= 254 && EMAIL.is_match(email)
}

/// Outcome of processing one billing request, published to the results queue.
///
/// Serialized with a `status` discriminator: `"success"` or `"error"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BillingResult {
    Success {
        customer_email: String,
        amount: i64,
        currency: String,
        payment_intent_id: String,
        client_secret: String,
    },
    Error {
        /// `None` when the message was too malformed to carry an email
        customer_email: Option<String>,
        error: String,
    },
}

impl BillingResult {
    /// Build the success variant for a charged request.
    pub fn success(request: &BillingRequest, payment_intent_id: String, client_secret: String) -> Self {
        BillingResult::Success {
            customer_email: request.email.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            payment_intent_id,
            client_secret,
        }
    }

    /// Build the error variant.
    pub fn failure(customer_email: Option<String>, error: impl std::fmt::Display) -> Self {
        BillingResult::Error {
            customer_email,
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BillingResult::Success { .. })
    }

    pub fn customer_email(&self) -> Option<&str> {
        match self {
            BillingResult::Success { customer_email, .. } => Some(customer_email),
            BillingResult::Error { customer_email, .. } => customer_email.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_currency_defaults_to_eur() {
        let request: BillingRequest =
            serde_json::from_value(json!({"username": "alice", "email": "a@x.com", "amount": 13000}))
                .unwrap();
        assert_eq!(request.currency, "eur");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_missing_email_fails_to_parse() {
        let parsed = serde_json::from_value::<BillingRequest>(json!({"username": "alice", "amount": 1}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_fields() {
        let base = BillingRequest::new("alice", "a@x.com", 100);

        let mut empty = base.clone();
        empty.username = "   ".to_string();
        assert_eq!(empty.validate(), Err(ValidationError::EmptyUsername));

        let mut bad_email = base.clone();
        bad_email.email = "not-an-email".to_string();
        assert!(matches!(bad_email.validate(), Err(ValidationError::InvalidEmail(_))));

        let mut zero = base.clone();
        zero.amount = 0;
        assert_eq!(zero.validate(), Err(ValidationError::NonPositiveAmount(0)));

        let dollars = base.with_currency("dollars");
        assert!(matches!(dollars.validate(), Err(ValidationError::InvalidCurrency(_))));
    }

    #[test]
    fn test_email_syntax() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("a x@x.com"));
    }

    #[test]
    fn test_success_result_wire_format() {
        let request = BillingRequest::new("alice", "a@x.com", 13000);
        let result = BillingResult::success(&request, "pi_1".to_string(), "pi_1_secret".to_string());

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "status": "success",
                "customer_email": "a@x.com",
                "amount": 13000,
                "currency": "eur",
                "payment_intent_id": "pi_1",
                "client_secret": "pi_1_secret"
            })
        );
    }

    #[test]
    fn test_error_result_wire_format() {
        let result = BillingResult::failure(Some("a@x.com".to_string()), "card declined");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"status": "error", "customer_email": "a@x.com", "error": "card declined"})
        );
        assert!(!result.is_success());
        assert_eq!(result.customer_email(), Some("a@x.com"));
    }
}
