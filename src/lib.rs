//! # ness-gate
//!
//! Payment-gated access subscriptions for Privateness bots.
//!
//! A user unlocks a bot for a fixed period by sending the bot's price in NCH
//! to its payment address. The paying address must also keep holding a
//! minimum NESS stake; periodic reconciliation revokes access once it doesn't.
//!
//! ## Components
//!
//! - [`registry::BotRegistry`]: immutable per-bot payment parameters
//! - [`verification::TransactionVerifier`]: node RPC first, explorer fallback
//! - [`verification::BalanceChecker`]: stake lookups through the same sources
//! - [`store::SubscriptionStore`]: one row per (user, bot) pair
//! - [`access::AccessManager`]: grant, probe, reconcile and sweep
//!
//! ## Example
//!
//! ```rust,ignore
//! use ness_gate::{AccessManager, GateConfig};
//!
//! let config = GateConfig::from_file("ness-gate.toml".as_ref())?;
//! let manager = AccessManager::from_config(&config)?;
//! let grant = manager.verify_and_grant("42", "signal-bot", &tx_hash).await?;
//! println!("access until {}", grant.expires_at);
//! ```

#![doc(html_root_url = "https://docs.rs/ness-gate")]

pub mod access;
pub mod config;
pub mod error;
pub mod event;
pub mod registry;
pub mod store;
pub mod verification;

pub use access::{AccessError, AccessManager, AccessStatus, Grant, GrantStatus, SweepStats};
pub use config::GateConfig;
pub use error::{Error, Result};
pub use event::{AccessEvent, AccessEventsChannel};
pub use registry::{BotConfig, BotRegistry};
pub use store::{MemoryStore, SqliteStore, Subscription, SubscriptionStore, TransactionClaim};
pub use verification::{BalanceChecker, TransactionCheckResult, TransactionVerifier};
