//! Access event system.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Events emitted by the access manager.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessEvent {
    /// A subscription was created or renewed.
    Granted {
        /// User identifier.
        user_id: String,
        /// Bot identifier.
        bot_id: String,
        /// Expiry of the new subscription.
        expires_at: DateTime<Utc>,
    },

    /// A subscription was removed because the payer no longer holds the stake.
    Revoked {
        /// User identifier.
        user_id: String,
        /// Bot identifier.
        bot_id: String,
    },

    /// An enforcement sweep finished.
    SweepComplete {
        /// Live subscriptions reconciled.
        checked: u64,
        /// Subscriptions revoked.
        revoked: u64,
        /// Expired rows removed.
        purged: u64,
    },
}

/// Channel for receiving access events.
pub type AccessEventsChannel = broadcast::Receiver<AccessEvent>;

/// Sender for access events.
pub type AccessEventsSender = broadcast::Sender<AccessEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (AccessEventsSender, AccessEventsChannel) {
    broadcast::channel(256)
}
