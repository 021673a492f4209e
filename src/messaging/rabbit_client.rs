//! RabbitMQ client for the billing relay.
//!
//! Connections are short-lived for publishing and health checks. The worker
//! holds one long-lived connection per consumer session.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, uri::AMQPUri, BasicProperties, Channel, Connection,
    ConnectionProperties, Consumer,
};
use tracing::{debug, info, instrument, warn};

use super::transport::{BrokerTransport, ConsumerSession, EventPublisher, HealthProbe, InboundMessage};
use crate::error::{RelayError, Result};
use crate::types::{EventEnvelope, EventType, RelayConfig};
use crate::{BILLING_REQUESTS_QUEUE, BILLING_RESULTS_QUEUE, BROKER_PORT};

const CONSUMER_TAG: &str = "billing-worker";

/// Properties for every message this service publishes.
fn persistent_properties() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(2) // Persistent
        .with_content_type("application/json".into())
}

/// Connection factory for the broker.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    uri: AMQPUri,
    host: String,
}

impl AmqpBroker {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            uri: config.amqp_uri(),
            host: config.rabbitmq_host.clone(),
        }
    }

    /// Establish a connection. Errors are returned as-is; callers decide on retry.
    #[instrument(skip(self), fields(host = %self.host, port = BROKER_PORT))]
    pub async fn open_connection(&self) -> Result<Connection> {
        let connection = Connection::connect_uri(self.uri.clone(), ConnectionProperties::default()).await?;
        debug!("Broker connection opened");
        Ok(connection)
    }

    /// Open a channel and declare both queues as durable.
    pub async fn open_channel(connection: &Connection) -> Result<Channel> {
        let channel = connection.create_channel().await?;

        for queue in [BILLING_REQUESTS_QUEUE, BILLING_RESULTS_QUEUE] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        Ok(channel)
    }

    async fn publish_envelope(&self, connection: &Connection, queue: &str, body: &[u8]) -> Result<()> {
        let channel = Self::open_channel(connection).await?;
        channel.confirm_select(ConfirmSelectOptions::default()).await?;

        let confirmation = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                persistent_properties(),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(RelayError::Rejected(format!("broker nacked message for {}", queue)));
        }
        Ok(())
    }

    async fn start_consumer(connection: &Connection) -> Result<(Channel, Consumer)> {
        let channel = Self::open_channel(connection).await?;

        channel.basic_qos(1, BasicQosOptions::default()).await?;

        let consumer = channel
            .basic_consume(
                BILLING_REQUESTS_QUEUE,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok((channel, consumer))
    }
}

async fn close_quietly(connection: &Connection, reason: &str) {
    if !connection.status().connected() {
        return;
    }
    if let Err(e) = connection.close(200, reason).await {
        debug!(error = %e, "Ignoring error while closing broker connection");
    }
}

#[async_trait]
impl EventPublisher for AmqpBroker {
    #[instrument(skip(self, data))]
    async fn publish(&self, event_type: EventType, data: serde_json::Value) -> Result<()> {
        let queue = event_type.envelope_queue().ok_or_else(|| {
            RelayError::Rejected(format!("{} events are not published as envelopes", event_type))
        })?;
        let body = EventEnvelope::new(event_type, data).to_bytes()?;

        let connection = self.open_connection().await?;
        let published = self.publish_envelope(&connection, queue, &body).await;
        close_quietly(&connection, "publish complete").await;
        published?;

        info!(queue = %queue, bytes = body.len(), "Event published");
        Ok(())
    }
}

#[async_trait]
impl HealthProbe for AmqpBroker {
    async fn ping(&self) -> Result<()> {
        let connection = self.open_connection().await?;
        connection.close(200, "health check").await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerTransport for AmqpBroker {
    type Session = AmqpSession;

    #[instrument(skip(self), fields(host = %self.host))]
    async fn open_consumer(&self) -> Result<AmqpSession> {
        let connection = self.open_connection().await?;

        match Self::start_consumer(&connection).await {
            Ok((channel, consumer)) => {
                info!(queue = BILLING_REQUESTS_QUEUE, "Started consuming");
                Ok(AmqpSession {
                    connection,
                    channel,
                    consumer,
                })
            }
            Err(e) => {
                close_quietly(&connection, "consumer setup failed").await;
                Err(e)
            }
        }
    }
}

/// Worker-owned connection, channel and consumer.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl ConsumerSession for AmqpSession {
    async fn recv(&mut self) -> Option<Result<InboundMessage>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|d| InboundMessage {
                    delivery_tag: d.delivery_tag,
                    body: d.data,
                    redelivered: d.redelivered,
                })
                .map_err(RelayError::from),
        )
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                persistent_properties(),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close(200, "worker closing").await {
            warn!(error = %e, "Failed to close worker channel");
        }
        close_quietly(&self.connection, "worker closing").await;
    }
}
