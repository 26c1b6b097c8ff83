//! Transaction verifier.

use super::cache::{CacheStats, ConfirmedCache};
use super::source::{SourceChain, TransactionSource};
use super::{RejectionReason, TransactionCheckResult, TransactionReport, TxStatus};
use crate::registry::BotConfig;
use tracing::{debug, info, warn};

/// Length of a transaction hash in hex characters.
const TX_HASH_HEX_LEN: usize = 64;

/// Decides whether a transaction pays for a bot.
pub struct TransactionVerifier {
    sources: SourceChain<dyn TransactionSource>,
    cache: ConfirmedCache,
}

/// Whether `tx_ref` looks like a transaction hash (64 hex characters).
#[must_use]
pub fn is_well_formed_reference(tx_ref: &str) -> bool {
    tx_ref.len() == TX_HASH_HEX_LEN && hex::decode(tx_ref).is_ok()
}

/// Check a report against a bot's payment condition.
///
/// Status is checked first, then the recipient (exact match), then the
/// amount (`received >= required`).
#[must_use]
pub fn validate_report(report: &TransactionReport, bot: &BotConfig) -> TransactionCheckResult {
    if report.status != TxStatus::Confirmed {
        return TransactionCheckResult::rejected(RejectionReason::Unconfirmed);
    }

    if report.receiver != bot.payment_address {
        return TransactionCheckResult::rejected(RejectionReason::WrongRecipient {
            expected: bot.payment_address.clone(),
            actual: report.receiver.clone(),
        });
    }

    if report.amount < bot.required_payment_amount {
        return TransactionCheckResult::rejected(RejectionReason::AmountTooLow {
            received: report.amount,
            required: bot.required_payment_amount,
        });
    }

    TransactionCheckResult::verified(report)
}

impl TransactionVerifier {
    /// Create a verifier over an ordered source chain.
    #[must_use]
    pub fn new(sources: SourceChain<dyn TransactionSource>, cache_capacity: usize) -> Self {
        Self {
            sources,
            cache: ConfirmedCache::with_capacity(cache_capacity),
        }
    }

    /// Verify that `tx_ref` pays `bot`.
    ///
    /// Never fails: source errors become a `SourceUnreachable` result once
    /// every source has been tried.
    pub async fn verify(&self, tx_ref: &str, bot: &BotConfig) -> TransactionCheckResult {
        let tx_ref = tx_ref.trim();
        if !is_well_formed_reference(tx_ref) {
            debug!("Rejecting malformed transaction reference {tx_ref:?}");
            return TransactionCheckResult::rejected(RejectionReason::MalformedReference);
        }

        let report = if let Some(cached) = self.cache.get(tx_ref) {
            debug!(
                "Transaction {tx_ref} served from cache ({:.0}% hit rate)",
                self.cache.stats().hit_rate()
            );
            cached
        } else {
            match self
                .sources
                .first_success(|source| async move { source.fetch_transaction(tx_ref, bot).await })
                .await
            {
                Ok(report) => {
                    self.cache.insert(report.clone());
                    report
                }
                Err(exhausted) => {
                    warn!("Transaction {tx_ref} could not be looked up: {exhausted}");
                    return TransactionCheckResult::unreachable();
                }
            }
        };

        let result = validate_report(&report, bot);
        match result.failure_reason() {
            None => info!(
                "Transaction {tx_ref} pays {} NCH to {} for {}",
                report.amount, report.receiver, bot.bot_id
            ),
            Some(reason) => info!("Transaction {tx_ref} rejected for {}: {reason}", bot.bot_id),
        }
        result
    }

    /// Source names in the order they are tried.
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.source_names()
    }

    /// Confirmed-transaction cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
