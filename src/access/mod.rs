//! Access manager: grants, probes and revokes bot subscriptions.
//!
//! Per (user, bot) pair the lifecycle is:
//!
//! ```text
//!                 verify_and_grant
//! NoSubscription ─────────────────▶ Active
//!       ▲                             │
//!       │      reconcile_status       │  now >= expires_at
//!       └──── (stake dropped) ◀───────┴──────────────────▶ (expired)
//! ```
//!
//! Revoked and expired subscriptions are indistinguishable from never having
//! subscribed.
//!
//! A transaction pays for one pair only. Its first redemption is recorded as a
//! claim, and the grant it buys always ends one subscription period after that
//! redemption, however often it is presented again.

mod response;

pub use response::{AccessResponse, GrantResponse, PaymentDetails};

use crate::config::GateConfig;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, AccessEvent, AccessEventsChannel, AccessEventsSender};
use crate::registry::BotRegistry;
use crate::store::{SqliteStore, Subscription, SubscriptionStore, TransactionClaim};
use crate::verification::{self, BalanceChecker, FailureReason, RejectionReason, TransactionVerifier};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Why a grant was refused.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The bot id is not registered.
    #[error("unknown bot: {0}")]
    ConfigNotFound(String),

    /// The transaction was checked and does not pay for the bot.
    #[error("invalid transaction: {0}")]
    TransactionInvalid(RejectionReason),

    /// The payer does not hold the required stake.
    #[error("payer {address} holds less than the required {minimum} NESS")]
    BalanceInsufficient {
        /// Verified payer address.
        address: String,
        /// Required NESS balance.
        minimum: f64,
    },

    /// No verification source could be reached; retry with the same transaction.
    #[error("payment could not be verified right now, retry later")]
    VerificationSourceUnreachable,

    /// The subscription store failed; nothing was written.
    #[error("subscription store failure: {0}")]
    Persistence(#[source] Error),
}

impl From<FailureReason> for AccessError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Rejected(reason) => Self::TransactionInvalid(reason),
            FailureReason::SourceUnreachable => Self::VerificationSourceUnreachable,
        }
    }
}

/// Result of an access probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessStatus {
    /// Whether a live subscription exists.
    pub access: bool,
    /// Its expiry, when live.
    pub expires_at: Option<DateTime<Utc>>,
}

/// How a successful grant came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStatus {
    /// A new subscription was written.
    Granted,
    /// A live subscription already existed; nothing was verified or written.
    AlreadyActive,
}

/// A successful grant.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    /// New or existing subscription.
    pub status: GrantStatus,
    /// Bot name for the confirmation message.
    pub bot_display_name: String,
    /// The bot's payment address.
    pub payment_address: String,
    /// End of access.
    pub expires_at: DateTime<Utc>,
}

/// Tunables of the subscription lifecycle.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    /// How long a grant lasts.
    pub subscription_duration: chrono::Duration,
    /// Stake a payer must keep holding, enforced on reconcile.
    pub minimum_held_balance: f64,
    /// Subscriptions reconciled concurrently during a sweep.
    pub sweep_concurrency: usize,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            subscription_duration: chrono::Duration::days(30),
            minimum_held_balance: 1.0,
            sweep_concurrency: 8,
        }
    }
}

impl AccessPolicy {
    /// Policy from the `[subscription]` section.
    #[must_use]
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            subscription_duration: chrono::Duration::days(i64::from(
                config.subscription.duration_days.max(1),
            )),
            minimum_held_balance: config.subscription.minimum_held_balance,
            sweep_concurrency: sweep_concurrency(config),
        }
    }
}

/// Requested sweep concurrency, capped at the explorer's session count when
/// the explorer is enabled.
fn sweep_concurrency(config: &GateConfig) -> usize {
    let requested = config.subscription.sweep_concurrency.max(1);
    if config.explorer.enabled {
        requested.min(config.explorer.max_sessions.max(1))
    } else {
        requested
    }
}

/// What reconciling one subscription did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    /// The payer still holds the stake.
    Kept,
    /// The row was removed.
    Revoked,
    /// The row changed since it was read and was left alone.
    Superseded,
}

/// Outcome of one enforcement sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    /// Live subscriptions reconciled.
    pub checked: u64,
    /// Subscriptions revoked for insufficient stake.
    pub revoked: u64,
    /// Expired rows removed.
    pub purged: u64,
    /// Reconciliations that hit a store error.
    pub failed: u64,
}

/// Orchestrates registry, verifier, balance checker and store.
///
/// Holds no per-pair state; calls for different pairs run concurrently.
pub struct AccessManager {
    registry: Arc<BotRegistry>,
    verifier: Arc<TransactionVerifier>,
    balances: Arc<BalanceChecker>,
    store: Arc<dyn SubscriptionStore>,
    policy: AccessPolicy,
    events_tx: AccessEventsSender,
}

impl AccessManager {
    /// Assemble a manager from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<BotRegistry>,
        verifier: Arc<TransactionVerifier>,
        balances: Arc<BalanceChecker>,
        store: Arc<dyn SubscriptionStore>,
        policy: AccessPolicy,
    ) -> Self {
        let (events_tx, _) = create_event_channel();
        Self {
            registry,
            verifier,
            balances,
            store,
            policy,
            events_tx,
        }
    }

    /// Build a manager with real sources and the SQLite store.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry, sources or store cannot be built.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let registry = BotRegistry::from_config(config)?;
        if registry.is_empty() {
            warn!("No bots configured - every grant will fail with ConfigNotFound");
        }
        let (verifier, balances) = verification::build_from_config(config)?;
        let store = SqliteStore::open(&config.store.path)?;

        info!(
            "Access manager ready ({} bots, {}-day subscriptions)",
            registry.len(),
            config.subscription.duration_days
        );

        Ok(Self::new(
            Arc::new(registry),
            Arc::new(verifier),
            Arc::new(balances),
            Arc::new(store),
            AccessPolicy::from_config(config),
        ))
    }

    /// Subscribe to access events.
    #[must_use]
    pub fn subscribe_events(&self) -> AccessEventsChannel {
        self.events_tx.subscribe()
    }

    /// The bot registry.
    #[must_use]
    pub fn registry(&self) -> &BotRegistry {
        &self.registry
    }

    async fn live_subscription(
        &self,
        user_id: &str,
        bot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .store
            .get(user_id, bot_id)
            .await?
            .filter(|sub| sub.is_live_at(now)))
    }

    /// Whether the user currently has access to the bot.
    ///
    /// A store read only: no source is contacted and the stake is not
    /// re-checked.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn check_ongoing_access(&self, user_id: &str, bot_id: &str) -> Result<AccessStatus> {
        let live = self.live_subscription(user_id, bot_id, Utc::now()).await?;
        debug!(
            "Access probe for {user_id} on {bot_id}: {}",
            if live.is_some() { "active" } else { "none" }
        );
        Ok(AccessStatus {
            access: live.is_some(),
            expires_at: live.map(|sub| sub.expires_at),
        })
    }

    /// Verify a payment and grant access.
    ///
    /// Replaying the call while the grant is live returns
    /// [`GrantStatus::AlreadyActive`] without verifying again. The stake is
    /// only checked after the payment verified.
    ///
    /// A transaction already redeemed by another pair, or whose paid period
    /// has ended, is refused with [`RejectionReason::AlreadyRedeemed`].
    /// Presenting it again for the pair it paid for restores the original
    /// expiry.
    ///
    /// # Errors
    ///
    /// Returns an [`AccessError`] describing why access was refused. An
    /// unavailable payer balance is reported as
    /// [`AccessError::VerificationSourceUnreachable`]. No subscription is
    /// written unless access is granted.
    pub async fn verify_and_grant(
        &self,
        user_id: &str,
        bot_id: &str,
        tx_ref: &str,
    ) -> std::result::Result<Grant, AccessError> {
        let bot = self
            .registry
            .lookup(bot_id)
            .ok_or_else(|| AccessError::ConfigNotFound(bot_id.to_string()))?;

        let existing = self
            .live_subscription(user_id, bot_id, Utc::now())
            .await
            .map_err(|e| persistence_fault(user_id, bot_id, e))?;
        if let Some(sub) = existing {
            info!("{user_id} already subscribed to {bot_id} until {}", sub.expires_at);
            return Ok(Grant {
                status: GrantStatus::AlreadyActive,
                bot_display_name: bot.display_name.clone(),
                payment_address: bot.payment_address.clone(),
                expires_at: sub.expires_at,
            });
        }

        let payment = self.verifier.verify(tx_ref, bot).await.into_outcome()?;

        match self.balances.balance_of(&payment.payer_address).await {
            None => {
                warn!(
                    "Refusing {bot_id} for {user_id}: balance of {} unavailable",
                    payment.payer_address
                );
                return Err(AccessError::VerificationSourceUnreachable);
            }
            Some(balance) if balance < bot.minimum_held_balance => {
                info!(
                    "Refusing {bot_id} for {user_id}: {} holds {balance}, below {} NESS",
                    payment.payer_address, bot.minimum_held_balance
                );
                return Err(AccessError::BalanceInsufficient {
                    address: payment.payer_address,
                    minimum: bot.minimum_held_balance,
                });
            }
            Some(_) => {}
        }

        let now = Utc::now();
        let claim = self
            .store
            .claim_transaction(TransactionClaim {
                tx_ref: tx_ref.trim().to_ascii_lowercase(),
                user_id: user_id.to_string(),
                bot_id: bot_id.to_string(),
                redeemed_at: now,
            })
            .await
            .map_err(|e| persistence_fault(user_id, bot_id, e))?;

        let expires_at = claim.redeemed_at + self.policy.subscription_duration;
        if !claim.is_held_by(user_id, bot_id) {
            info!(
                "Refusing {bot_id} for {user_id}: transaction already redeemed by {} for {}",
                claim.user_id, claim.bot_id
            );
            return Err(AccessError::TransactionInvalid(RejectionReason::AlreadyRedeemed));
        }
        if expires_at <= now {
            info!("Refusing {bot_id} for {user_id}: transaction paid for a period that has ended");
            return Err(AccessError::TransactionInvalid(RejectionReason::AlreadyRedeemed));
        }

        let subscription = Subscription {
            user_id: user_id.to_string(),
            bot_id: bot_id.to_string(),
            bot_display_name: bot.display_name.clone(),
            payer_address: payment.payer_address,
            created_at: claim.redeemed_at,
            expires_at,
        };

        self.store
            .upsert(subscription)
            .await
            .map_err(|e| persistence_fault(user_id, bot_id, e))?;

        info!("Granted {bot_id} to {user_id} until {expires_at}");
        let _ = self.events_tx.send(AccessEvent::Granted {
            user_id: user_id.to_string(),
            bot_id: bot_id.to_string(),
            expires_at,
        });

        Ok(Grant {
            status: GrantStatus::Granted,
            bot_display_name: bot.display_name.clone(),
            payment_address: bot.payment_address.clone(),
            expires_at,
        })
    }

    /// Re-check the payer's stake and revoke access if it dropped.
    ///
    /// Returns whether access is still active. Without a live subscription
    /// this returns `false` without contacting any source.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the row cannot be
    /// deleted.
    pub async fn reconcile_status(&self, user_id: &str, bot_id: &str) -> Result<bool> {
        let Some(sub) = self.live_subscription(user_id, bot_id, Utc::now()).await? else {
            return Ok(false);
        };
        match self.reconcile(&sub).await? {
            Reconciled::Kept => Ok(true),
            Reconciled::Revoked => Ok(false),
            Reconciled::Superseded => Ok(self
                .live_subscription(user_id, bot_id, Utc::now())
                .await?
                .is_some()),
        }
    }

    /// Revoke `sub` if its payer no longer holds the stake. The row is only
    /// removed while it still matches `sub`, so a grant written in between
    /// survives.
    async fn reconcile(&self, sub: &Subscription) -> Result<Reconciled> {
        if self
            .balances
            .has_minimum_balance(&sub.payer_address, self.policy.minimum_held_balance)
            .await
        {
            return Ok(Reconciled::Kept);
        }

        if !self.store.delete_if_unchanged(sub).await? {
            debug!(
                "Subscription of {} to {} changed during reconcile, leaving it",
                sub.user_id, sub.bot_id
            );
            return Ok(Reconciled::Superseded);
        }
        warn!(
            "Revoked {} for {}: {} no longer holds {} NESS",
            sub.bot_id, sub.user_id, sub.payer_address, self.policy.minimum_held_balance
        );
        let _ = self.events_tx.send(AccessEvent::Revoked {
            user_id: sub.user_id.clone(),
            bot_id: sub.bot_id.clone(),
        });
        Ok(Reconciled::Revoked)
    }

    /// Reconcile every live subscription and purge expired rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed or purged. Errors on
    /// individual rows are counted in [`SweepStats::failed`].
    pub async fn sweep(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let live: Vec<Subscription> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|sub| sub.is_live_at(now))
            .collect();

        let outcomes: Vec<Result<Reconciled>> = stream::iter(live.iter().map(|sub| self.reconcile(sub)).collect::<Vec<_>>())
            .buffer_unordered(self.policy.sweep_concurrency.max(1))
            .collect()
            .await;

        let mut stats = SweepStats {
            checked: live.len() as u64,
            ..SweepStats::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(Reconciled::Revoked) => stats.revoked += 1,
                Ok(Reconciled::Kept | Reconciled::Superseded) => {}
                Err(e) => {
                    error!("Reconcile failed during sweep: {e}");
                    stats.failed += 1;
                }
            }
        }
        stats.purged = self.store.purge_expired(now).await?;

        info!(
            "Sweep complete: {} checked, {} revoked, {} purged, {} failed",
            stats.checked, stats.revoked, stats.purged, stats.failed
        );
        let _ = self.events_tx.send(AccessEvent::SweepComplete {
            checked: stats.checked,
            revoked: stats.revoked,
            purged: stats.purged,
        });
        Ok(stats)
    }

    /// Sweep every `interval` until `shutdown` turns true or its sender is
    /// dropped. The first sweep runs immediately.
    pub async fn run_sweeps(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Sweeper stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Sweep failed: {e}");
                    }
                }
            }
        }
    }

    /// [`Self::verify_and_grant`] rendered for the messaging and web layers.
    pub async fn grant_response(&self, user_id: &str, bot_id: &str, tx_ref: &str) -> GrantResponse {
        let outcome = self.verify_and_grant(user_id, bot_id, tx_ref).await;
        GrantResponse::from_outcome(&outcome, self.registry.lookup(bot_id))
    }

    /// [`Self::check_ongoing_access`] rendered for the messaging and web layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn access_response(&self, user_id: &str, bot_id: &str) -> Result<AccessResponse> {
        Ok(AccessResponse::from(self.check_ongoing_access(user_id, bot_id).await?))
    }
}

fn persistence_fault(user_id: &str, bot_id: &str, e: Error) -> AccessError {
    error!("Subscription store fault for {user_id}/{bot_id}: {e}");
    AccessError::Persistence(e)
}
