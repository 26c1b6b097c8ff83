//! Test harness wiring an access manager to scripted sources.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ness_gate::access::AccessPolicy;
use ness_gate::verification::{
    BalanceSource, NamedSource, SourceChain, SourceError, TransactionReport, TransactionSource,
    TxStatus,
};
use ness_gate::{
    AccessManager, BalanceChecker, BotConfig, BotRegistry, Error, MemoryStore, Subscription,
    SubscriptionStore, TransactionClaim, TransactionVerifier,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bot used by most tests.
pub const BOT_ID: &str = "signal-bot";
/// Its payment address.
pub const BOT_ADDRESS: &str = "2kGY2fECeGbaQWnq2QvZ9L7ng7QkerUraMn";
/// Its price in NCH.
pub const BOT_PRICE: f64 = 3000.0;
/// NESS a payer must hold.
pub const MINIMUM_STAKE: f64 = 10.0;
/// Address that pays in the happy path.
pub const PAYER: &str = "ADDR_PAYER";

/// A 64-hex transaction hash derived from `seed`.
pub fn tx_hash(seed: u8) -> String {
    format!("{seed:02x}").repeat(32)
}

/// A confirmed payment report.
pub fn payment(tx_ref: &str, receiver: &str, amount: f64) -> TransactionReport {
    TransactionReport {
        tx_ref: tx_ref.to_string(),
        status: TxStatus::Confirmed,
        sender: PAYER.to_string(),
        receiver: receiver.to_string(),
        amount,
    }
}

/// Scripted transaction and balance source.
pub struct FakeSource {
    name: &'static str,
    down: AtomicBool,
    balances_down: AtomicBool,
    transactions: Mutex<HashMap<String, TransactionReport>>,
    balances: Mutex<HashMap<String, f64>>,
    tx_calls: AtomicUsize,
    balance_calls: AtomicUsize,
}

impl FakeSource {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            down: AtomicBool::new(false),
            balances_down: AtomicBool::new(false),
            transactions: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            tx_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
        }
    }

    /// Make every lookup fail as unreachable.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Make balance lookups fail as unreachable while transactions resolve.
    pub fn set_balances_down(&self, down: bool) {
        self.balances_down.store(down, Ordering::SeqCst);
    }

    /// Serve `report` for its reference.
    pub fn add_transaction(&self, report: TransactionReport) {
        self.transactions.lock().insert(report.tx_ref.clone(), report);
    }

    /// Serve `balance` for `address`.
    pub fn set_balance(&self, address: &str, balance: f64) {
        self.balances.lock().insert(address.to_string(), balance);
    }

    /// Transaction lookups so far.
    pub fn tx_calls(&self) -> usize {
        self.tx_calls.load(Ordering::SeqCst)
    }

    /// Balance lookups so far.
    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<(), SourceError> {
        if self.down.load(Ordering::SeqCst) {
            Err(SourceError::Unreachable(format!("{} is down", self.name)))
        } else {
            Ok(())
        }
    }
}

impl NamedSource for FakeSource {
    fn name(&self) -> &str {
        self.name
    }
}

#[async_trait]
impl TransactionSource for FakeSource {
    async fn fetch_transaction(
        &self,
        tx_ref: &str,
        _bot: &BotConfig,
    ) -> Result<TransactionReport, SourceError> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        self.transactions
            .lock()
            .get(tx_ref)
            .cloned()
            .ok_or_else(|| SourceError::Malformed(format!("unknown transaction {tx_ref}")))
    }
}

#[async_trait]
impl BalanceSource for FakeSource {
    async fn fetch_balance(&self, address: &str) -> Result<f64, SourceError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        if self.balances_down.load(Ordering::SeqCst) {
            return Err(SourceError::Unreachable(format!("{} balances are down", self.name)));
        }
        Ok(self.balances.lock().get(address).copied().unwrap_or(0.0))
    }
}

/// Memory store that can be told to fail.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_upserts: AtomicBool,
    listed: Mutex<Option<Vec<Subscription>>>,
}

impl FaultyStore {
    /// Make `get` and `list` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `upsert` fail.
    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    /// Answer the next `list` with `rows` instead of the stored rows.
    pub fn list_once(&self, rows: Vec<Subscription>) {
        *self.listed.lock() = Some(rows);
    }

    /// Stored rows, live or expired.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn check(flag: &AtomicBool, op: &str) -> ness_gate::Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(Error::Store(format!("{op} failed: disk I/O error")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SubscriptionStore for FaultyStore {
    async fn upsert(&self, subscription: Subscription) -> ness_gate::Result<()> {
        Self::check(&self.fail_upserts, "upsert")?;
        self.inner.upsert(subscription).await
    }

    async fn get(&self, user_id: &str, bot_id: &str) -> ness_gate::Result<Option<Subscription>> {
        Self::check(&self.fail_reads, "get")?;
        self.inner.get(user_id, bot_id).await
    }

    async fn delete(&self, user_id: &str, bot_id: &str) -> ness_gate::Result<bool> {
        self.inner.delete(user_id, bot_id).await
    }

    async fn delete_if_unchanged(&self, subscription: &Subscription) -> ness_gate::Result<bool> {
        self.inner.delete_if_unchanged(subscription).await
    }

    async fn list(&self) -> ness_gate::Result<Vec<Subscription>> {
        Self::check(&self.fail_reads, "list")?;
        if let Some(rows) = self.listed.lock().take() {
            return Ok(rows);
        }
        self.inner.list().await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> ness_gate::Result<u64> {
        self.inner.purge_expired(now).await
    }

    async fn claim_transaction(
        &self,
        claim: TransactionClaim,
    ) -> ness_gate::Result<TransactionClaim> {
        self.inner.claim_transaction(claim).await
    }
}

/// An access manager over a memory store and two fake sources, RPC first.
pub struct TestHarness {
    /// Manager under test.
    pub manager: AccessManager,
    /// Its store.
    pub store: Arc<FaultyStore>,
    /// Primary source.
    pub rpc: Arc<FakeSource>,
    /// Fallback source.
    pub explorer: Arc<FakeSource>,
}

impl TestHarness {
    /// Harness with the default policy.
    pub fn new() -> Self {
        Self::with_policy(AccessPolicy {
            minimum_held_balance: MINIMUM_STAKE,
            ..AccessPolicy::default()
        })
    }

    /// Harness with a custom policy.
    pub fn with_policy(policy: AccessPolicy) -> Self {
        let registry = BotRegistry::new(vec![BotConfig {
            bot_id: BOT_ID.to_string(),
            required_payment_amount: BOT_PRICE,
            minimum_held_balance: MINIMUM_STAKE,
            payment_address: BOT_ADDRESS.to_string(),
            display_name: "@signal_bot".to_string(),
        }])
        .expect("registry");

        let rpc = Arc::new(FakeSource::new("rpc"));
        let explorer = Arc::new(FakeSource::new("explorer"));
        let timeout = Duration::from_secs(5);

        let tx_chain = SourceChain::<dyn TransactionSource>::new()
            .with_source(rpc.clone(), timeout)
            .with_source(explorer.clone(), timeout);
        let balance_chain = SourceChain::<dyn BalanceSource>::new()
            .with_source(rpc.clone(), timeout)
            .with_source(explorer.clone(), timeout);

        let store = Arc::new(FaultyStore::default());
        let manager = AccessManager::new(
            Arc::new(registry),
            Arc::new(TransactionVerifier::new(tx_chain, 128)),
            Arc::new(BalanceChecker::new(balance_chain)),
            store.clone(),
            policy,
        );

        Self {
            manager,
            store,
            rpc,
            explorer,
        }
    }

    /// Publish a confirmed payment of `amount` to the bot on both sources and
    /// give the payer `stake` NESS.
    pub fn publish_payment(&self, tx_ref: &str, amount: f64, stake: f64) {
        for source in [&self.rpc, &self.explorer] {
            source.add_transaction(payment(tx_ref, BOT_ADDRESS, amount));
            source.set_balance(PAYER, stake);
        }
    }

    /// Lookups of any kind across both sources.
    pub fn total_calls(&self) -> usize {
        self.rpc.tx_calls()
            + self.rpc.balance_calls()
            + self.explorer.tx_calls()
            + self.explorer.balance_calls()
    }
}
