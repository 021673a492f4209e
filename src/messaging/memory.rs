//! In-memory broker with the same queue semantics as the AMQP client.
//!
//! Supports prefetch of one per session, redelivery of unacknowledged
//! messages when a connection drops, and scripted connection failures.
//! Used by tests and for running the relay without a broker.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::transport::{BrokerTransport, ConsumerSession, EventPublisher, HealthProbe, InboundMessage};
use crate::error::{RelayError, Result};
use crate::types::{BillingResult, EventEnvelope, EventType};
use crate::{BILLING_REQUESTS_QUEUE, BILLING_RESULTS_QUEUE};

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct BrokerState {
    ready: VecDeque<StoredMessage>,
    /// delivery tag -> (owning session, message)
    unacked: HashMap<u64, (u64, StoredMessage)>,
    results: Vec<Vec<u8>>,
    acked: usize,
    next_tag: u64,
    next_session: u64,
    generation: u64,
    down: bool,
    failing_connects: usize,
    connect_attempts: usize,
    closed_sessions: usize,
    reject_results: bool,
}

impl BrokerState {
    /// Put a session's unacked messages back at the head of the queue.
    fn requeue(&mut self, session: Option<u64>) {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, (owner, _))| session.map_or(true, |s| *owner == s))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable_by(|a, b| b.cmp(a));

        for tag in tags {
            if let Some((_, mut message)) = self.unacked.remove(&tag) {
                message.redelivered = true;
                self.ready.push_front(message);
            }
        }
    }
}

/// Shared handle to an in-memory broker. Clones see the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a raw body on the request queue.
    pub fn push_request(&self, body: impl Into<Vec<u8>>) {
        self.state().ready.push_back(StoredMessage {
            body: body.into(),
            redelivered: false,
        });
        self.notify.notify_waiters();
    }

    /// Bodies waiting on the request queue.
    pub fn pending_requests(&self) -> Vec<Vec<u8>> {
        self.state().ready.iter().map(|m| m.body.clone()).collect()
    }

    /// Raw bodies published to the results queue.
    pub fn results(&self) -> Vec<Vec<u8>> {
        self.state().results.clone()
    }

    /// Results queue decoded as billing results.
    pub fn billing_results(&self) -> Vec<BillingResult> {
        self.state()
            .results
            .iter()
            .filter_map(|body| serde_json::from_slice(body).ok())
            .collect()
    }

    pub fn acked_count(&self) -> usize {
        self.state().acked
    }

    pub fn unacked_count(&self) -> usize {
        self.state().unacked.len()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    pub fn closed_sessions(&self) -> usize {
        self.state().closed_sessions
    }

    /// Refuse every connection while `down` is set.
    pub fn set_down(&self, down: bool) {
        self.state().down = down;
    }

    /// Refuse the next `count` consumer connections.
    pub fn fail_next_connects(&self, count: usize) {
        self.state().failing_connects = count;
    }

    /// Make publishes to the results queue fail.
    pub fn reject_result_publishes(&self, reject: bool) {
        self.state().reject_results = reject;
    }

    /// Reset every open connection, requeueing unacked messages as redelivered.
    pub fn drop_connections(&self) {
        {
            let mut state = self.state();
            state.generation += 1;
            state.requeue(None);
        }
        self.notify.notify_waiters();
    }

    fn connection_refused(&self) -> Result<()> {
        if self.state().down {
            return Err(RelayError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, event_type: EventType, data: serde_json::Value) -> Result<()> {
        self.connection_refused()?;
        if event_type.envelope_queue().is_none() {
            return Err(RelayError::Rejected(format!(
                "{} events are not published as envelopes",
                event_type
            )));
        }
        let body = EventEnvelope::new(event_type, data).to_bytes()?;

        self.state().ready.push_back(StoredMessage {
            body,
            redelivered: false,
        });
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl HealthProbe for InMemoryBroker {
    async fn ping(&self) -> Result<()> {
        self.connection_refused()
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    type Session = InMemorySession;

    async fn open_consumer(&self) -> Result<InMemorySession> {
        let mut state = self.state();
        state.connect_attempts += 1;

        if state.down {
            return Err(RelayError::Unavailable("connection refused".to_string()));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(RelayError::Unavailable("connection refused".to_string()));
        }

        state.next_session += 1;
        Ok(InMemorySession {
            broker: self.clone(),
            id: state.next_session,
            generation: state.generation,
            closed: false,
        })
    }
}

/// One consumer connection to an [`InMemoryBroker`].
pub struct InMemorySession {
    broker: InMemoryBroker,
    id: u64,
    generation: u64,
    closed: bool,
}

impl InMemorySession {
    fn check_alive(&self, state: &BrokerState) -> Result<()> {
        if self.closed || state.generation != self.generation {
            return Err(RelayError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConsumerSession for InMemorySession {
    async fn recv(&mut self) -> Option<Result<InboundMessage>> {
        if self.closed {
            return None;
        }

        loop {
            let notified = self.broker.notify.notified();
            {
                let mut state = self.broker.state();
                if let Err(e) = self.check_alive(&state) {
                    return Some(Err(e));
                }

                let busy = state.unacked.values().any(|(owner, _)| *owner == self.id);
                if !busy {
                    if let Some(message) = state.ready.pop_front() {
                        state.next_tag += 1;
                        let tag = state.next_tag;
                        state.unacked.insert(tag, (self.id, message.clone()));
                        return Some(Ok(InboundMessage {
                            delivery_tag: tag,
                            body: message.body,
                            redelivered: message.redelivered,
                        }));
                    }
                }
            }
            notified.await;
        }
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        {
            let mut state = self.broker.state();
            self.check_alive(&state)?;

            match queue {
                BILLING_RESULTS_QUEUE if state.reject_results => {
                    return Err(RelayError::Rejected("results queue unavailable".to_string()));
                }
                BILLING_RESULTS_QUEUE => state.results.push(body.to_vec()),
                BILLING_REQUESTS_QUEUE => state.ready.push_back(StoredMessage {
                    body: body.to_vec(),
                    redelivered: false,
                }),
                other => return Err(RelayError::Rejected(format!("unknown queue {}", other))),
            }
        }
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.broker.state();
        self.check_alive(&state)?;

        match state.unacked.remove(&delivery_tag) {
            Some(_) => {
                state.acked += 1;
                Ok(())
            }
            None => Err(RelayError::Rejected(format!(
                "unknown delivery tag {}",
                delivery_tag
            ))),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut state = self.broker.state();
            state.closed_sessions += 1;
            if state.generation == self.generation {
                state.requeue(Some(self.id));
            }
        }
        self.broker.notify.notify_waiters();
    }
}
