//! Source traits and the ordered fallback chain.

use super::{SourceError, TransactionReport};
use crate::registry::BotConfig;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// A named external source, for logs and failure reports.
pub trait NamedSource: Send + Sync {
    /// Short source name (`rpc`, `explorer`, ...).
    fn name(&self) -> &str;
}

/// A source that can describe a transaction.
#[async_trait]
pub trait TransactionSource: NamedSource {
    /// Look up the transaction. An `Err` hands over to the next source.
    async fn fetch_transaction(
        &self,
        tx_ref: &str,
        bot: &BotConfig,
    ) -> Result<TransactionReport, SourceError>;
}

/// A source that can report an address balance.
#[async_trait]
pub trait BalanceSource: NamedSource {
    /// Current NESS balance of `address`.
    async fn fetch_balance(&self, address: &str) -> Result<f64, SourceError>;
}

/// Every source in a chain failed.
#[derive(Debug, Clone, Error)]
pub struct ChainExhausted {
    /// Source name and failure, in chain order.
    pub failures: Vec<(String, SourceError)>,
}

impl fmt::Display for ChainExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no sources configured");
        }
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|(name, err)| format!("{name}: {err}"))
            .collect();
        write!(f, "all sources failed ({})", parts.join("; "))
    }
}

/// Sources tried in order until one answers.
///
/// Each call is bounded, so a hung source counts as a failure instead of
/// blocking the caller. Most sources are bounded by the chain; sources that
/// queue for their own capacity bound their calls themselves, starting once
/// they have that capacity.
pub struct SourceChain<S: ?Sized> {
    sources: Vec<(Arc<S>, Option<Duration>)>,
}

impl<S: ?Sized> Default for SourceChain<S> {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
        }
    }
}

impl<S: ?Sized + NamedSource> SourceChain<S> {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source with the ceiling for one call to it.
    pub fn push(&mut self, source: Arc<S>, timeout: Duration) {
        self.sources.push((source, Some(timeout)));
    }

    /// Append a source that enforces its own call deadline.
    ///
    /// The chain waits for it without a ceiling, so time spent queueing for
    /// the source's capacity is never reported as a timeout.
    pub fn push_self_bounded(&mut self, source: Arc<S>) {
        self.sources.push((source, None));
    }

    /// Builder form of [`Self::push`].
    #[must_use]
    pub fn with_source(mut self, source: Arc<S>, timeout: Duration) -> Self {
        self.push(source, timeout);
        self
    }

    /// Number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the chain has no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Source names in chain order.
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|(s, _)| s.name()).collect()
    }

    /// Run `op` against each source in order; the first `Ok` wins.
    ///
    /// # Errors
    ///
    /// Returns every source's failure when none succeeds.
    pub async fn first_success<T, F, Fut>(&self, op: F) -> Result<T, ChainExhausted>
    where
        F: Fn(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut failures = Vec::with_capacity(self.sources.len());

        for (source, timeout) in &self.sources {
            let name = source.name().to_string();
            let call = op(Arc::clone(source));
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(*limit, call)
                    .await
                    .unwrap_or(Err(SourceError::Timeout(*limit))),
                None => call.await,
            };
            match outcome {
                Ok(value) => {
                    debug!("Source {name} answered");
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Source {name} failed: {e}, trying next source");
                    failures.push((name, e));
                }
            }
        }

        Err(ChainExhausted { failures })
    }
}
