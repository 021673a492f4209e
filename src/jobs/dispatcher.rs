//! Background publishing of intake events.
//!
//! The HTTP handler hands a job to [`PublishDispatcher::submit`] and returns
//! immediately. A [`DispatcherHandle`] task publishes each job on its own
//! task and records failures in [`DispatchStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{RelayError, Result};
use crate::messaging::EventPublisher;
use crate::types::EventType;

/// An event waiting to be published.
#[derive(Debug, Clone)]
pub struct PublishJob {
    pub event_type: EventType,
    pub data: serde_json::Value,
    /// Identifier used in logs (e.g. the username)
    pub reference: String,
}

/// Counters for submitted and completed publish jobs.
#[derive(Debug, Default)]
pub struct DispatchStats {
    queued: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    last_error: RwLock<Option<String>>,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub queued: u64,
    pub published: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

impl DispatchStats {
    fn record_failure(&self, error: &RelayError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_error.write() {
            *last = Some(error.to_string());
        }
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            queued: self.queued.load(Ordering::SeqCst),
            published: self.published.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            last_error: self.last_error.read().ok().and_then(|e| e.clone()),
        }
    }
}

/// Sending side held by request handlers.
#[derive(Clone)]
pub struct PublishDispatcher {
    sender: mpsc::Sender<PublishJob>,
    stats: Arc<DispatchStats>,
}

/// Receiving side; run it as a background task.
pub struct DispatcherHandle {
    receiver: mpsc::Receiver<PublishJob>,
    publisher: Arc<dyn EventPublisher>,
    stats: Arc<DispatchStats>,
}

impl PublishDispatcher {
    /// Create a dispatcher with room for `capacity` queued jobs.
    pub fn new(publisher: Arc<dyn EventPublisher>, capacity: usize) -> (Self, DispatcherHandle) {
        let (sender, receiver) = mpsc::channel(capacity);
        let stats = Arc::new(DispatchStats::default());

        let dispatcher = Self {
            sender,
            stats: stats.clone(),
        };
        let handle = DispatcherHandle {
            receiver,
            publisher,
            stats,
        };

        (dispatcher, handle)
    }

    /// Queue a job without waiting. Fails if the queue is full or closed.
    pub fn submit(&self, job: PublishJob) -> Result<()> {
        self.sender
            .try_send(job)
            .map_err(|e| RelayError::Dispatch(e.to_string()))?;
        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }
}

impl DispatcherHandle {
    /// Publish jobs until every dispatcher is dropped, then drain in-flight work.
    pub async fn run(mut self) {
        info!("Publish dispatcher started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                job = self.receiver.recv() => match job {
                    Some(job) => {
                        let publisher = self.publisher.clone();
                        let stats = self.stats.clone();
                        in_flight.spawn(publish_job(publisher, stats, job));
                    }
                    None => break,
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
        info!("Publish dispatcher stopped");
    }
}

async fn publish_job(publisher: Arc<dyn EventPublisher>, stats: Arc<DispatchStats>, job: PublishJob) {
    match publisher.publish(job.event_type, job.data).await {
        Ok(()) => {
            stats.published.fetch_add(1, Ordering::SeqCst);
            info!(event_type = %job.event_type, reference = %job.reference, "Billing event published");
        }
        Err(e) => {
            stats.record_failure(&e);
            error!(
                event_type = %job.event_type,
                reference = %job.reference,
                error = %e,
                "Failed to publish billing event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryBroker;
    use crate::types::EventEnvelope;
    use serde_json::json;
    use std::time::Duration;

    fn job(username: &str) -> PublishJob {
        PublishJob {
            event_type: EventType::BillingRequest,
            data: json!({"username": username, "email": "a@x.com", "amount": 100, "currency": "eur"}),
            reference: username.to_string(),
        }
    }

    async fn settle(dispatcher: &PublishDispatcher, expected: u64) -> DispatchSnapshot {
        for _ in 0..500 {
            let stats = dispatcher.stats();
            if stats.published + stats.failed >= expected {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs did not complete");
    }

    #[tokio::test]
    async fn test_jobs_are_published_as_envelopes() {
        let broker = InMemoryBroker::new();
        let (dispatcher, handle) = PublishDispatcher::new(Arc::new(broker.clone()), 8);
        tokio::spawn(handle.run());

        dispatcher.submit(job("alice")).unwrap();
        let stats = settle(&dispatcher, 1).await;

        assert_eq!(stats.published, 1);
        let pending = broker.pending_requests();
        let envelope = EventEnvelope::from_bytes(&pending[0]).unwrap();
        assert_eq!(envelope.event_type, EventType::BillingRequest);
        assert_eq!(envelope.data_field("username").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_publish_failure_is_recorded() {
        let broker = InMemoryBroker::new();
        broker.set_down(true);
        let (dispatcher, handle) = PublishDispatcher::new(Arc::new(broker), 8);
        tokio::spawn(handle.run());

        tokio_test::assert_ok!(dispatcher.submit(job("alice")));
        let stats = settle(&dispatcher, 1).await;

        assert_eq!(stats.queued, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_submit_fails_when_full_or_closed() {
        let (dispatcher, handle) = PublishDispatcher::new(Arc::new(InMemoryBroker::new()), 1);

        tokio_test::assert_ok!(dispatcher.submit(job("first")));
        tokio_test::assert_err!(dispatcher.submit(job("second")));

        drop(handle);
        assert!(matches!(dispatcher.submit(job("third")), Err(RelayError::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_run_drains_when_dispatchers_dropped() {
        let broker = InMemoryBroker::new();
        let (dispatcher, handle) = PublishDispatcher::new(Arc::new(broker.clone()), 8);
        dispatcher.submit(job("a")).unwrap();
        dispatcher.submit(job("b")).unwrap();
        drop(dispatcher);

        handle.run().await;
        assert_eq!(broker.pending_requests().len(), 2);
    }
}
