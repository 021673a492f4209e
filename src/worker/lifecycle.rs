//! Start/stop handle for background tasks tied to the service lifetime.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::billing_worker::BillingWorker;
use crate::messaging::BrokerTransport;

/// How long `stop` waits for the task before aborting it.
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to a spawned background task and the token that stops it.
pub struct WorkerHandle {
    name: &'static str,
    shutdown: CancellationToken,
    join: JoinHandle<()>,
    join_timeout: Duration,
}

impl WorkerHandle {
    /// Spawn the billing worker on its own task.
    pub fn start<T: BrokerTransport>(worker: BillingWorker<T>) -> Self {
        let shutdown = worker.shutdown_token();
        Self::spawn("billing-worker", shutdown, worker.run())
    }

    /// Spawn any task that exits once `shutdown` is cancelled.
    pub fn spawn<F>(name: &'static str, shutdown: CancellationToken, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let join = tokio::spawn(task);
        info!(task = name, "Background task started");
        Self {
            name,
            shutdown,
            join,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Set how long `stop` waits before aborting.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(mut self) {
        self.shutdown.cancel();

        match tokio::time::timeout(self.join_timeout, &mut self.join).await {
            Ok(Ok(())) => info!(task = self.name, "Background task stopped"),
            Ok(Err(e)) => error!(task = self.name, error = %e, "Background task panicked"),
            Err(_) => {
                warn!(
                    task = self.name,
                    timeout_secs = self.join_timeout.as_secs(),
                    "Background task did not stop in time, aborting"
                );
                self.join.abort();
            }
        }
    }
}
