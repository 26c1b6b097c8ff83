//! Stake balance checks.

use super::source::{BalanceSource, SourceChain};
use tracing::{debug, warn};

/// Answers whether an address holds at least a given NESS balance.
pub struct BalanceChecker {
    sources: SourceChain<dyn BalanceSource>,
}

impl BalanceChecker {
    /// Create a checker over an ordered source chain.
    #[must_use]
    pub fn new(sources: SourceChain<dyn BalanceSource>) -> Self {
        Self { sources }
    }

    /// Current balance of `address`, or `None` if no source answered.
    pub async fn balance_of(&self, address: &str) -> Option<f64> {
        match self
            .sources
            .first_success(|source| async move { source.fetch_balance(address).await })
            .await
        {
            Ok(balance) => Some(balance),
            Err(exhausted) => {
                warn!("Balance of {address} unavailable: {exhausted}");
                None
            }
        }
    }

    /// Whether `address` holds at least `minimum`.
    ///
    /// An unavailable balance counts as insufficient.
    pub async fn has_minimum_balance(&self, address: &str, minimum: f64) -> bool {
        match self.balance_of(address).await {
            Some(balance) => {
                debug!("{address} holds {balance} NESS (minimum {minimum})");
                balance >= minimum
            }
            None => false,
        }
    }
}
