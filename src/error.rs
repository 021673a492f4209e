//! Error types for the billing relay.

use thiserror::Error;

/// Errors raised by the relay's library components.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Connection, channel or protocol failure talking to the broker
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// The consumer stream ended without a stop signal
    #[error("Consumer stream closed by broker")]
    ConsumerClosed,

    /// Event encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded or is out of range
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// gRPC endpoint could not be built
    #[error("gRPC transport error: {0}")]
    GrpcTransport(#[from] tonic::transport::Error),

    /// Outbound HTTP call failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Publish job could not be handed to the dispatcher
    #[error("Failed to schedule publish: {0}")]
    Dispatch(String),

    /// Broker connection unavailable or reset
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Broker refused a publish or the event has no route
    #[error("Publish rejected: {0}")]
    Rejected(String),
}

impl RelayError {
    /// Whether the error means the broker connection is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            RelayError::Broker(_) | RelayError::ConsumerClosed | RelayError::Unavailable(_)
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_classified() {
        assert!(RelayError::ConsumerClosed.is_connection_error());
        assert!(RelayError::Unavailable("down".to_string()).is_connection_error());
        assert!(!RelayError::Dispatch("full".to_string()).is_connection_error());
    }

    #[test]
    fn test_error_messages() {
        let err = RelayError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Broker unavailable: connection refused");
    }
}
