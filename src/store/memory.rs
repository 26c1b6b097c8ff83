//! In-process subscription store.

use super::{Subscription, SubscriptionStore, TransactionClaim};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Key = (String, String);

/// Subscription store backed by a mutex-guarded map.
///
/// Used for tests and for running without a database file.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<HashMap<Key, Subscription>>>,
    claims: Arc<Mutex<HashMap<String, TransactionClaim>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows, live or expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

fn key(user_id: &str, bot_id: &str) -> Key {
    (user_id.to_string(), bot_id.to_string())
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn upsert(&self, subscription: Subscription) -> Result<()> {
        let k = key(&subscription.user_id, &subscription.bot_id);
        self.rows.lock().insert(k, subscription);
        Ok(())
    }

    async fn get(&self, user_id: &str, bot_id: &str) -> Result<Option<Subscription>> {
        Ok(self.rows.lock().get(&key(user_id, bot_id)).cloned())
    }

    async fn delete(&self, user_id: &str, bot_id: &str) -> Result<bool> {
        Ok(self.rows.lock().remove(&key(user_id, bot_id)).is_some())
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        Ok(self.rows.lock().values().cloned().collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, sub| sub.is_live_at(now));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_if_unchanged(&self, subscription: &Subscription) -> Result<bool> {
        let mut rows = self.rows.lock();
        let k = key(&subscription.user_id, &subscription.bot_id);
        let unchanged = rows.get(&k).is_some_and(|current| {
            current.payer_address == subscription.payer_address
                && current.expires_at == subscription.expires_at
        });
        if unchanged {
            rows.remove(&k);
        }
        Ok(unchanged)
    }

    async fn claim_transaction(&self, claim: TransactionClaim) -> Result<TransactionClaim> {
        Ok(self
            .claims
            .lock()
            .entry(claim.tx_ref.clone())
            .or_insert(claim)
            .clone())
    }
}
