//! LRU cache of confirmed transactions.
//!
//! A confirmed transaction never changes, so its report can be reused when
//! the same reference is submitted again (for example after a revocation).
//! Unconfirmed reports are never cached.

use super::{TransactionReport, TxStatus};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// LRU cache keyed by transaction reference.
#[derive(Clone)]
pub struct ConfirmedCache {
    inner: Arc<Mutex<LruCache<String, TransactionReport>>>,
    stats: Arc<Mutex<CacheStats>>,
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries added.
    pub additions: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl ConfirmedCache {
    /// Create a new cache with the specified capacity (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    /// Look up a confirmed report.
    pub fn get(&self, tx_ref: &str) -> Option<TransactionReport> {
        let found = self.inner.lock().get(tx_ref).cloned();

        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        found
    }

    /// Remember a report if it is confirmed. Returns whether it was stored.
    pub fn insert(&self, report: TransactionReport) -> bool {
        if report.status != TxStatus::Confirmed {
            return false;
        }
        self.inner.lock().put(report.tx_ref.clone(), report);
        self.stats.lock().additions += 1;
        true
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }
}
