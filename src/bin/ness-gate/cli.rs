//! Command-line interface definition.

use clap::{Parser, Subcommand};
use ness_gate::GateConfig;
use std::path::PathBuf;

/// Payment-gated access subscriptions for Privateness bots.
#[derive(Parser, Debug)]
#[command(name = "ness-gate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "NESS_GATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node JSON-RPC endpoint.
    #[arg(long, env = "NESS_GATE_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Skip the node RPC source.
    #[arg(long)]
    pub no_rpc: bool,

    /// Explorer base URL.
    #[arg(long, env = "NESS_GATE_EXPLORER_URL")]
    pub explorer_url: Option<String>,

    /// Skip the explorer source.
    #[arg(long)]
    pub no_explorer: bool,

    /// Subscription database path.
    #[arg(long, env = "NESS_GATE_DB")]
    pub db: Option<PathBuf>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Gate operations.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report whether a user has access to a bot.
    Check {
        /// User identifier.
        user: String,
        /// Bot identifier.
        bot: String,
    },

    /// Verify a payment and grant access.
    Grant {
        /// User identifier.
        user: String,
        /// Bot identifier.
        bot: String,
        /// Transaction hash of the payment.
        tx: String,
    },

    /// Re-check a subscriber's stake, revoking access if it dropped.
    Reconcile {
        /// User identifier.
        user: String,
        /// Bot identifier.
        bot: String,
    },

    /// Run the enforcement sweep.
    Sweep {
        /// Minutes between sweeps (defaults to the configured interval).
        #[arg(long)]
        interval_minutes: Option<u64>,

        /// Sweep once and exit.
        #[arg(long)]
        once: bool,
    },
}

impl Cli {
    /// Layer CLI arguments over the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn to_config(&self) -> color_eyre::Result<GateConfig> {
        let mut config = if let Some(ref path) = self.config {
            GateConfig::from_file(path)?
        } else {
            GateConfig::default()
        };

        if let Some(ref url) = self.rpc_url {
            config.rpc.url.clone_from(url);
        }
        if let Some(ref url) = self.explorer_url {
            config.explorer.base_url.clone_from(url);
        }
        if let Some(ref path) = self.db {
            config.store.path.clone_from(path);
        }
        if self.no_rpc {
            config.rpc.enabled = false;
        }
        if self.no_explorer {
            config.explorer.enabled = false;
        }
        config.log_level.clone_from(&self.log_level);

        Ok(config)
    }
}
