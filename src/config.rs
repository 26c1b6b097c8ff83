//! Configuration for ness-gate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default global payment address for bots that don't override it.
pub const DEFAULT_PAYMENT_ADDRESS: &str = "2kGY2fECeGbaQWnq2QvZ9L7ng7QkerUraMn";

/// Top-level gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Node RPC source.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Explorer scraping source.
    #[serde(default)]
    pub explorer: ExplorerConfig,

    /// Subscription lifecycle.
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// Subscription persistence.
    #[serde(default)]
    pub store: StoreConfig,

    /// Payment address for bots without their own.
    #[serde(default = "default_payment_address")]
    pub payment_address: String,

    /// Per-bot payment parameters.
    #[serde(default)]
    pub bots: Vec<BotEntry>,

    /// Capacity of the confirmed-transaction cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Chain node RPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Whether the RPC source is consulted.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON-RPC endpoint.
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Timeout per RPC call in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

/// Block explorer fallback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Whether the explorer source is consulted.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Explorer base URL (no trailing slash).
    #[serde(default = "default_explorer_url")]
    pub base_url: String,

    /// Ceiling on how long a single field may take to render.
    #[serde(default = "default_field_timeout")]
    pub field_timeout_secs: u64,

    /// Delay between page reloads while waiting for a field.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Timeout for a single page load.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound on concurrently open scraping sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Rendered labels of the transaction page fields.
    #[serde(default)]
    pub tx_labels: TxLabels,

    /// Rendered label of the balance figure on the address page.
    #[serde(default = "default_balance_label")]
    pub balance_label: String,
}

/// Labels the explorer renders next to each transaction field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxLabels {
    /// Confirmation status label.
    #[serde(default = "default_status_label")]
    pub status: String,
    /// Sender address label.
    #[serde(default = "default_sender_label")]
    pub sender: String,
    /// Receiver address label.
    #[serde(default = "default_receiver_label")]
    pub receiver: String,
    /// Transferred amount label.
    #[serde(default = "default_amount_label")]
    pub amount: String,
}

/// Subscription lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Length of a granted subscription in days.
    #[serde(default = "default_duration_days")]
    pub duration_days: u32,

    /// Minimum NESS a payer must keep holding, checked on reconcile.
    #[serde(default = "default_minimum_held")]
    pub minimum_held_balance: f64,

    /// Interval between enforcement sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_minutes: u64,

    /// Subscriptions reconciled concurrently during a sweep.
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
}

/// Subscription store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path, or `:memory:`.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// A bot entry as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotEntry {
    /// Bot identifier used by callers.
    pub bot_id: String,
    /// Name shown to users, usually the bot's handle.
    pub display_name: String,
    /// NCH that must be sent to unlock the bot.
    pub required_payment_amount: f64,
    /// NESS the payer must hold at grant time.
    pub minimum_held_balance: f64,
    /// Payment address override.
    #[serde(default)]
    pub payment_address: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            explorer: ExplorerConfig::default(),
            subscription: SubscriptionConfig::default(),
            store: StoreConfig::default(),
            payment_address: default_payment_address(),
            bots: Vec::new(),
            cache_capacity: default_cache_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_rpc_url(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_explorer_url(),
            field_timeout_secs: default_field_timeout(),
            poll_interval_ms: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            max_sessions: default_max_sessions(),
            tx_labels: TxLabels::default(),
            balance_label: default_balance_label(),
        }
    }
}

impl Default for TxLabels {
    fn default() -> Self {
        Self {
            status: default_status_label(),
            sender: default_sender_label(),
            receiver: default_receiver_label(),
            amount: default_amount_label(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            duration_days: default_duration_days(),
            minimum_held_balance: default_minimum_held(),
            sweep_interval_minutes: default_sweep_interval(),
            sweep_concurrency: default_sweep_concurrency(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:6660".to_string()
}

const fn default_rpc_timeout() -> u64 {
    30
}

fn default_explorer_url() -> String {
    "https://ness-explorer.magnum.uy".to_string()
}

const fn default_field_timeout() -> u64 {
    20
}

const fn default_poll_interval() -> u64 {
    500
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_max_sessions() -> usize {
    4
}

fn default_status_label() -> String {
    "Status".to_string()
}

fn default_sender_label() -> String {
    "Sender".to_string()
}

fn default_receiver_label() -> String {
    "Receiver".to_string()
}

fn default_amount_label() -> String {
    "Amount".to_string()
}

fn default_balance_label() -> String {
    "Balance".to_string()
}

const fn default_duration_days() -> u32 {
    30
}

const fn default_minimum_held() -> f64 {
    1.0
}

const fn default_sweep_interval() -> u64 {
    60
}

const fn default_sweep_concurrency() -> usize {
    8
}

fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "ness-gate")
        .map(|dirs| dirs.data_dir().join("subscriptions.db"))
        .unwrap_or_else(|| PathBuf::from("subscriptions.db"))
}

fn default_payment_address() -> String {
    DEFAULT_PAYMENT_ADDRESS.to_string()
}

const fn default_cache_capacity() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GateConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
