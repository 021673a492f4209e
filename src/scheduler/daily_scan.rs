//! Periodic scan that charges subscriptions due today.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::types::Subscription;

use super::store::SubscriptionStore;

/// Shortest accepted wait between scans.
const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Calls the external payment endpoint for one subscription.
#[async_trait]
pub trait PaymentCaller: Send + Sync {
    /// Returns the HTTP status code of the payment call.
    async fn charge(&self, subscription: &Subscription) -> Result<u16>;
}

/// `GET {base_url}/pay?user_id=..&amount=..`
pub struct HttpPaymentCaller {
    client: Client,
    base_url: String,
}

impl HttpPaymentCaller {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentCaller for HttpPaymentCaller {
    async fn charge(&self, subscription: &Subscription) -> Result<u16> {
        let response = self
            .client
            .get(format!("{}/pay", self.base_url))
            .query(&[
                ("user_id", subscription.user_id.to_string()),
                ("amount", subscription.price.to_string()),
            ])
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}

/// Outcome counts of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Scans the store on a fixed interval and charges due subscriptions.
pub struct DailyScan {
    store: Arc<dyn SubscriptionStore>,
    caller: Arc<dyn PaymentCaller>,
    interval: Duration,
}

impl DailyScan {
    /// `interval` is raised to one second if shorter.
    pub fn new(store: Arc<dyn SubscriptionStore>, caller: Arc<dyn PaymentCaller>, interval: Duration) -> Self {
        Self {
            store,
            caller,
            interval: interval.max(MIN_SCAN_INTERVAL),
        }
    }

    /// Charge every subscription due on `today`. A failing subscription does
    /// not stop the scan.
    pub async fn scan_once(&self, today: NaiveDate) -> Result<ScanReport> {
        let due = self.store.due_on(today).await?;
        let mut report = ScanReport {
            due: due.len(),
            ..ScanReport::default()
        };

        for subscription in &due {
            match self.caller.charge(subscription).await {
                Ok(200) => {
                    report.succeeded += 1;
                    info!(user_id = subscription.user_id, "Payment successful");
                }
                Ok(status) => {
                    report.failed += 1;
                    warn!(user_id = subscription.user_id, status, "Payment failed");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(user_id = subscription.user_id, error = %e, "Payment call error");
                }
            }
        }

        Ok(report)
    }

    /// Scan now and then once per interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "Daily subscription scan started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let today = Utc::now().date_naive();
                    match self.scan_once(today).await {
                        Ok(report) => info!(
                            %today,
                            due = report.due,
                            succeeded = report.succeeded,
                            failed = report.failed,
                            "Subscription scan finished"
                        ),
                        Err(e) => error!(error = %e, "Subscription scan failed"),
                    }
                }
            }
        }

        info!("Daily subscription scan stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::scheduler::InMemorySubscriptionStore;
    use crate::types::{NewSubscription, PlanType};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Answers by user id: 1 pays, 2 gets a 500, anything else errors.
    #[derive(Default)]
    struct ScriptedCaller {
        calls: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl PaymentCaller for ScriptedCaller {
        async fn charge(&self, subscription: &Subscription) -> Result<u16> {
            self.calls.lock().unwrap().push(subscription.user_id);
            match subscription.user_id {
                1 => Ok(200),
                2 => Ok(500),
                _ => Err(RelayError::Unavailable("payment endpoint down".to_string())),
            }
        }
    }

    async fn store_with(users: &[u64], date: NaiveDate) -> Arc<InMemorySubscriptionStore> {
        let store = Arc::new(InMemorySubscriptionStore::new());
        for &user_id in users {
            store
                .insert(NewSubscription {
                    user_id,
                    plan: PlanType::Pro,
                    next_payment_date: date,
                    price: 29.0,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_scan_counts_each_outcome() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let store = store_with(&[1, 2, 3], today).await;
        store
            .insert(NewSubscription {
                user_id: 4,
                plan: PlanType::Basic,
                next_payment_date: today.succ_opt().unwrap(),
                price: 5.0,
            })
            .await
            .unwrap();

        let caller = Arc::new(ScriptedCaller::default());
        let scan = DailyScan::new(store, caller.clone(), Duration::from_secs(60));

        let report = scan.scan_once(today).await.unwrap();

        assert_eq!(
            report,
            ScanReport {
                due: 3,
                succeeded: 1,
                failed: 2
            }
        );
        assert_eq!(*caller.calls.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_nothing_due_makes_no_calls() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let store = store_with(&[1], today.succ_opt().unwrap()).await;
        let caller = Arc::new(ScriptedCaller::default());
        let scan = DailyScan::new(store, caller.clone(), Duration::from_secs(60));

        assert_eq!(scan.scan_once(today).await.unwrap(), ScanReport::default());
        assert!(caller.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_scans_at_start_and_each_interval() {
        let store = store_with(&[1], Utc::now().date_naive()).await;
        let caller = Arc::new(ScriptedCaller::default());
        let scan = DailyScan::new(store, caller.clone(), Duration::from_secs(24 * 3600));

        let token = CancellationToken::new();
        let task = tokio::spawn(scan.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(25 * 3600)).await;
        token.cancel();
        task.await.unwrap();

        assert_eq!(caller.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let store = store_with(&[1], Utc::now().date_naive()).await;
        let caller = Arc::new(ScriptedCaller::default());
        let scan = DailyScan::new(store, caller.clone(), Duration::ZERO);

        let token = CancellationToken::new();
        let task = tokio::spawn(scan.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        token.cancel();
        task.await.unwrap();

        // Scans at 0s, 1s and 2s
        assert_eq!(caller.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_http_caller_reports_unreachable_endpoint() {
        let caller = HttpPaymentCaller::new("http://127.0.0.1:1/").unwrap();
        let subscription = Subscription {
            id: 1,
            user_id: 1,
            plan: PlanType::Basic,
            next_payment_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            price: 1.5,
        };

        assert!(matches!(caller.charge(&subscription).await, Err(RelayError::Http(_))));
    }
}
