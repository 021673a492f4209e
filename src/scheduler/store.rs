//! Subscription storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::{NewSubscription, Subscription};

/// Persistence seam for subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Store a new subscription and return it with its assigned id.
    async fn insert(&self, subscription: NewSubscription) -> Result<Subscription>;

    /// Subscriptions whose next payment date is exactly `date`.
    async fn due_on(&self, date: NaiveDate) -> Result<Vec<Subscription>>;
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscriptions: BTreeMap<u64, Subscription>,
}

/// A thread-safe in-memory subscription store.
#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.subscriptions.len()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, subscription: NewSubscription) -> Result<Subscription> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;

        let stored = Subscription {
            id: inner.next_id,
            user_id: subscription.user_id,
            plan: subscription.plan,
            next_payment_date: subscription.next_payment_date,
            price: subscription.price,
        };
        inner.subscriptions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn due_on(&self, date: NaiveDate) -> Result<Vec<Subscription>> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| s.is_due_on(date))
            .cloned()
            .collect())
    }
}
