//! Self-describing event envelope used on the request queue.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::BILLING_REQUESTS_QUEUE;

/// Discriminator carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new billing request to be charged
    BillingRequest,
    /// The outcome of a charge
    BillingResult,
    /// Any discriminator this service does not understand
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BillingRequest => "billing_request",
            EventType::BillingResult => "billing_result",
            EventType::Unknown => "unknown",
        }
    }

    /// Queue an enveloped event of this type is published to.
    ///
    /// Only requests travel in envelopes. Results are written bare to the
    /// results queue by the worker.
    pub fn envelope_queue(&self) -> Option<&'static str> {
        match self {
            EventType::BillingRequest => Some(BILLING_REQUESTS_QUEUE),
            EventType::BillingResult | EventType::Unknown => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper carrying a payload with its type and publish time.
///
/// Producers serialize `EventEnvelope<&T>`; the worker decodes an
/// `EventEnvelope` (raw JSON payload) and dispatches on `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T = serde_json::Value> {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

impl<T: Serialize> EventEnvelope<T> {
    /// Wrap `data`, stamping the current UTC time.
    pub fn new(event_type: EventType, data: T) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl EventEnvelope {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Decode the payload into a concrete type.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Best-effort lookup of a string field in the payload.
    pub fn data_field(&self, field: &str) -> Option<String> {
        self.data.get(field)?.as_str().map(str::to_string)
    }
}
