//! Payment and stake verification.
//!
//! Transactions and balances are looked up through an ordered chain of
//! sources. The chain stops at the first source that produces an answer; a
//! source that errors or times out hands over to the next one.
//!
//! # Architecture
//!
//! ```text
//! verify(tx_ref, bot)
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Reference well-     │── no ──▶ Rejected(MalformedReference)
//! │ formed?             │
//! └─────────┬───────────┘
//!           │
//!           ▼
//! ┌─────────────────────┐
//! │ Confirmed-tx cache  │── hit ─────────────┐
//! └─────────┬───────────┘                    │
//!           │ miss                           │
//!           ▼                                │
//! ┌─────────────────────┐                    │
//! │ Node RPC            │── report ──────────┤
//! └─────────┬───────────┘                    │
//!           │ error / timeout                │
//!           ▼                                │
//! ┌─────────────────────┐                    │
//! │ Explorer scrape     │── report ──────────┤
//! └─────────┬───────────┘                    ▼
//!           │ error / timeout     ┌─────────────────────┐
//!           ▼                     │ Validate status,    │
//!   SourceUnreachable             │ recipient, amount   │
//!                                 └─────────────────────┘
//! ```

mod balance;
mod cache;
mod explorer;
mod rpc;
mod source;
mod verifier;

pub use balance::BalanceChecker;
pub use cache::{CacheStats, ConfirmedCache};
pub use explorer::{
    parse_amount, ExplorerLayout, HttpPageProvider, Locator, PageField, PageProvider, PageSession,
    ScrapeLimits, ScrapeSource,
};
pub use rpc::RpcSource;
pub use source::{BalanceSource, ChainExhausted, NamedSource, SourceChain, TransactionSource};
pub use verifier::{is_well_formed_reference, validate_report, TransactionVerifier};

use crate::config::GateConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Confirmation state of a transaction as reported by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Included in a block.
    Confirmed,
    /// Pending or otherwise not final.
    Unconfirmed,
}

impl TxStatus {
    /// Interpret a rendered or reported status label.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let first = label.split_whitespace().next().unwrap_or_default();
        if first.eq_ignore_ascii_case("confirmed") {
            Self::Confirmed
        } else {
            Self::Unconfirmed
        }
    }
}

/// What a source observed about a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReport {
    /// Transaction hash.
    pub tx_ref: String,
    /// Confirmation state.
    pub status: TxStatus,
    /// Sending address.
    pub sender: String,
    /// Receiving address.
    pub receiver: String,
    /// NCH transferred to the receiver.
    pub amount: f64,
}

/// Why a transaction does not satisfy a bot's payment condition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectionReason {
    /// Less than the required amount was sent.
    #[error("amount too low: sent {received} NCH, required {required} NCH")]
    AmountTooLow {
        /// Amount observed on chain.
        received: f64,
        /// Amount the bot requires.
        required: f64,
    },

    /// The payment went to another address.
    #[error("wrong recipient: payment must go to {expected}, was sent to {actual}")]
    WrongRecipient {
        /// Configured payment address.
        expected: String,
        /// Receiver observed on chain.
        actual: String,
    },

    /// The transaction is not confirmed yet.
    #[error("transaction is not confirmed")]
    Unconfirmed,

    /// The reference is not a transaction hash.
    #[error("malformed transaction reference")]
    MalformedReference,

    /// The transaction already paid for another grant.
    #[error("transaction was already used to pay for access")]
    AlreadyRedeemed,
}

/// Why a verification did not succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    /// The transaction was checked and does not satisfy the conditions.
    #[error("{0}")]
    Rejected(RejectionReason),

    /// No source could produce a determination.
    #[error("verification sources unreachable")]
    SourceUnreachable,
}

/// A soft failure of a single source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Connection or HTTP failure.
    #[error("source unreachable: {0}")]
    Unreachable(String),

    /// The call did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The node answered with an application-level error.
    #[error("node reported error: {0}")]
    Rpc(String),

    /// The answer could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A page field never rendered.
    #[error("field `{0}` did not render within {1:?}")]
    FieldTimeout(PageField, Duration),
}

/// A payment that satisfied a bot's conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayment {
    /// Sender taken from the verified source.
    pub payer_address: String,
    /// Amount taken from the verified source.
    pub amount_received: f64,
}

/// Outcome of one verification attempt.
///
/// Only built through its constructors, so a valid result always carries
/// the payer and amount.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionCheckResult {
    valid: bool,
    payer_address: Option<String>,
    amount_received: Option<f64>,
    failure_reason: Option<FailureReason>,
}

impl TransactionCheckResult {
    pub(crate) fn verified(report: &TransactionReport) -> Self {
        Self {
            valid: true,
            payer_address: Some(report.sender.clone()),
            amount_received: Some(report.amount),
            failure_reason: None,
        }
    }

    pub(crate) fn rejected(reason: RejectionReason) -> Self {
        Self {
            valid: false,
            payer_address: None,
            amount_received: None,
            failure_reason: Some(FailureReason::Rejected(reason)),
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            valid: false,
            payer_address: None,
            amount_received: None,
            failure_reason: Some(FailureReason::SourceUnreachable),
        }
    }

    /// Whether the payment condition is satisfied.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Sender of a valid payment.
    #[must_use]
    pub fn payer_address(&self) -> Option<&str> {
        self.payer_address.as_deref()
    }

    /// Amount of a valid payment.
    #[must_use]
    pub fn amount_received(&self) -> Option<f64> {
        self.amount_received
    }

    /// Reason for an invalid result.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&FailureReason> {
        self.failure_reason.as_ref()
    }

    /// Split into the verified payment or the failure reason.
    ///
    /// # Errors
    ///
    /// Returns the failure reason when the result is not valid.
    pub fn into_outcome(self) -> std::result::Result<VerifiedPayment, FailureReason> {
        match (self.valid, self.payer_address, self.amount_received) {
            (true, Some(payer_address), Some(amount_received)) => Ok(VerifiedPayment {
                payer_address,
                amount_received,
            }),
            _ => Err(self
                .failure_reason
                .unwrap_or(FailureReason::SourceUnreachable)),
        }
    }
}

/// Build the verifier and balance checker from configuration.
///
/// Sources are chained in a fixed order: node RPC, then explorer.
///
/// # Errors
///
/// Returns an error if no source is enabled or a source cannot be built.
pub fn build_from_config(config: &GateConfig) -> Result<(TransactionVerifier, BalanceChecker)> {
    let mut transactions: SourceChain<dyn TransactionSource> = SourceChain::new();
    let mut balances: SourceChain<dyn BalanceSource> = SourceChain::new();

    if config.rpc.enabled {
        let timeout = Duration::from_secs(config.rpc.timeout_secs);
        let rpc = Arc::new(RpcSource::new(config.rpc.url.clone(), timeout)?);
        // Slack on top of the client timeout so the client reports first.
        let bound = timeout + Duration::from_secs(1);
        transactions.push(rpc.clone(), bound);
        balances.push(rpc, bound);
    }

    if config.explorer.enabled {
        let explorer = &config.explorer;
        let limits = ScrapeLimits::from_config(explorer);
        let provider = Arc::new(HttpPageProvider::new(limits.load_timeout)?);
        let scrape = Arc::new(ScrapeSource::new(
            provider,
            explorer.base_url.clone(),
            ExplorerLayout::from_config(explorer)?,
            limits,
        ));
        transactions.push_self_bounded(scrape.clone());
        balances.push_self_bounded(scrape);
    }

    if transactions.is_empty() {
        return Err(Error::Config(
            "no verification source enabled (rpc and explorer both disabled)".to_string(),
        ));
    }

    info!(
        "Verification chain built: [{}]",
        transactions.source_names().join(" -> ")
    );

    Ok((
        TransactionVerifier::new(transactions, config.cache_capacity),
        BalanceChecker::new(balances),
    ))
}
