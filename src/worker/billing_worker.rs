//! Long-running consumer of the billing request queue.
//!
//! ```text
//!   Disconnected --open_consumer--> Consuming --recv--> process --> publish result --> ack
//!        ^                              |
//!        |   connection error           |
//!        +------- backoff wait <--------+
//!
//!   shutdown token (any state) --> close connection --> Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::processor::BillingProcessor;
use crate::error::{RelayError, Result};
use crate::messaging::{BrokerTransport, ConsumerSession, InboundMessage};
use crate::{BILLING_RESULTS_QUEUE, DEFAULT_RECONNECT_BACKOFF_SECS};

/// How a consumer session ended.
#[derive(Debug)]
enum SessionEnd {
    /// Shutdown was requested
    Stopped,
    /// Connection-level failure; reconnect after backoff
    Failed(RelayError),
}

/// Worker that relays billing requests to the payment gateway, one at a time.
pub struct BillingWorker<T: BrokerTransport> {
    transport: Arc<T>,
    processor: Arc<BillingProcessor>,
    backoff: Duration,
    shutdown: CancellationToken,
}

impl<T: BrokerTransport> BillingWorker<T> {
    /// Create a new billing worker.
    pub fn new(transport: Arc<T>, processor: Arc<BillingProcessor>, shutdown: CancellationToken) -> Self {
        Self {
            transport,
            processor,
            backoff: Duration::from_secs(DEFAULT_RECONNECT_BACKOFF_SECS),
            shutdown,
        }
    }

    /// Set the wait between reconnect attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Token that stops this worker when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token is cancelled, reconnecting forever.
    pub async fn run(self) {
        info!(backoff_secs = self.backoff.as_secs_f64(), "Billing worker starting");

        while !self.shutdown.is_cancelled() {
            let opened = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                opened = self.transport.open_consumer() => opened,
            };

            let end = match opened {
                Ok(mut session) => {
                    info!("Billing worker started. Waiting for billing requests...");
                    let end = self.consume(&mut session).await;
                    session.close().await;
                    end
                }
                Err(e) => SessionEnd::Failed(e),
            };

            match end {
                SessionEnd::Stopped => break,
                SessionEnd::Failed(e) => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    if e.is_connection_error() {
                        error!(error = %e, "AMQP connection error");
                    } else {
                        error!(error = %e, "Unexpected error in billing worker");
                    }
                    info!(backoff_secs = self.backoff.as_secs_f64(), "Attempting to reconnect");
                    if !self.wait_backoff().await {
                        break;
                    }
                }
            }
        }

        info!("Billing worker stopped");
    }

    /// Consume until shutdown or a connection-level failure.
    async fn consume(&self, session: &mut T::Session) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return SessionEnd::Stopped,
                next = session.recv() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => return SessionEnd::Failed(e),
                None => return SessionEnd::Failed(RelayError::ConsumerClosed),
            };

            if let Err(e) = self.handle(&*session, message).await {
                return SessionEnd::Failed(e);
            }
        }
    }

    /// Process one delivery, publish its result and ack it.
    ///
    /// The ack is sent whatever the payment outcome, and also when the result
    /// could not be published. Only an ack failure is returned.
    async fn handle(&self, session: &T::Session, message: InboundMessage) -> Result<()> {
        let tag = message.delivery_tag;
        if message.redelivered {
            warn!(delivery_tag = tag, "Processing redelivered billing request");
        }

        let result = self.processor.process(&message.body).await;

        match serde_json::to_vec(&result) {
            Ok(body) => {
                if let Err(e) = session.publish(BILLING_RESULTS_QUEUE, &body).await {
                    error!(delivery_tag = tag, error = %e, "Failed to publish billing result");
                }
            }
            Err(e) => error!(delivery_tag = tag, error = %e, "Failed to encode billing result"),
        }

        session.ack(tag).await?;

        info!(
            delivery_tag = tag,
            success = result.is_success(),
            customer_email = result.customer_email().unwrap_or("-"),
            "Billing request processed"
        );
        Ok(())
    }

    /// Sleep for the backoff. Returns `false` if shutdown interrupted the wait.
    async fn wait_backoff(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }
}
