//! # Messaging Module
//!
//! RabbitMQ integration for the billing relay.
//!
//! ## Features
//! - Durable `billing_requests` / `billing_results` queue declaration
//! - Per-call event publisher with persistent delivery
//! - Consumer sessions with prefetch of one for the billing worker
//! - In-memory broker with the same semantics for tests

pub mod memory;
pub mod rabbit_client;
mod transport;

pub use memory::InMemoryBroker;
pub use rabbit_client::{AmqpBroker, AmqpSession};
pub use transport::{BrokerTransport, ConsumerSession, EventPublisher, HealthProbe, InboundMessage};
