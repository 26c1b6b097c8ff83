//! Subscription persistence.
//!
//! One row per (user, bot) pair. A new grant replaces the prior row for the
//! pair; an expired row is treated exactly like an absent one by the access
//! manager, so rows may linger until [`SubscriptionStore::purge_expired`]
//! collects them.
//!
//! Each redeemed transaction is also recorded as a [`TransactionClaim`] bound
//! to the pair it paid for. Claims are never purged.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted, time-boxed access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// User identifier.
    pub user_id: String,
    /// Bot identifier.
    pub bot_id: String,
    /// Bot name at grant time.
    pub bot_display_name: String,
    /// Sender of the verified payment, never a caller-supplied address.
    pub payer_address: String,
    /// When the grant was made.
    pub created_at: DateTime<Utc>,
    /// End of access. Strictly after `created_at`.
    pub expires_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription still grants access at `now`.
    ///
    /// A subscription expiring exactly at `now` is already expired.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A transaction bound to the (user, bot) pair it paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionClaim {
    /// Normalized transaction hash.
    pub tx_ref: String,
    /// User the payment was redeemed for.
    pub user_id: String,
    /// Bot the payment was redeemed for.
    pub bot_id: String,
    /// When the transaction was first redeemed.
    pub redeemed_at: DateTime<Utc>,
}

impl TransactionClaim {
    /// Whether the claim belongs to the pair.
    #[must_use]
    pub fn is_held_by(&self, user_id: &str, bot_id: &str) -> bool {
        self.user_id == user_id && self.bot_id == bot_id
    }
}

/// Keyed store of subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert or replace the row for the subscription's (user, bot) pair.
    async fn upsert(&self, subscription: Subscription) -> Result<()>;

    /// Fetch the row for a pair, live or not.
    async fn get(&self, user_id: &str, bot_id: &str) -> Result<Option<Subscription>>;

    /// Remove the row for a pair. Returns whether a row existed.
    async fn delete(&self, user_id: &str, bot_id: &str) -> Result<bool>;

    /// All stored rows.
    async fn list(&self) -> Result<Vec<Subscription>>;

    /// Remove rows that are no longer live at `now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Remove the pair's row only if it still has the same payer and expiry
    /// as `subscription`. Returns whether a row was removed.
    async fn delete_if_unchanged(&self, subscription: &Subscription) -> Result<bool>;

    /// Record `claim` unless its transaction is already claimed, atomically.
    /// Returns the claim on record, which may belong to another pair.
    async fn claim_transaction(&self, claim: TransactionClaim) -> Result<TransactionClaim>;
}
