//! Immutable registry of per-bot payment parameters.

use crate::config::GateConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Payment parameters for one bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Identifier callers use for the bot.
    pub bot_id: String,
    /// NCH that must be sent to unlock the bot.
    pub required_payment_amount: f64,
    /// NESS the payer must hold when access is granted.
    pub minimum_held_balance: f64,
    /// Address the payment must be sent to.
    pub payment_address: String,
    /// Name shown to users.
    pub display_name: String,
}

/// Lookup table built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct BotRegistry {
    bots: HashMap<String, BotConfig>,
}

impl BotRegistry {
    /// Build a registry from bot configs.
    ///
    /// # Errors
    ///
    /// Returns an error if two entries share a bot id.
    pub fn new(configs: Vec<BotConfig>) -> Result<Self> {
        let mut bots = HashMap::with_capacity(configs.len());
        for config in configs {
            let id = config.bot_id.clone();
            if bots.insert(id.clone(), config).is_some() {
                return Err(Error::Config(format!("duplicate bot id: {id}")));
            }
        }
        Ok(Self { bots })
    }

    /// Build the registry from the `[[bots]]` table of a config file.
    ///
    /// Entries without a payment address inherit the global one.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate bot ids.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let bots = config
            .bots
            .iter()
            .map(|entry| BotConfig {
                bot_id: entry.bot_id.clone(),
                required_payment_amount: entry.required_payment_amount,
                minimum_held_balance: entry.minimum_held_balance,
                payment_address: entry
                    .payment_address
                    .clone()
                    .unwrap_or_else(|| config.payment_address.clone()),
                display_name: entry.display_name.clone(),
            })
            .collect();
        Self::new(bots)
    }

    /// Look up a bot by id.
    #[must_use]
    pub fn lookup(&self, bot_id: &str) -> Option<&BotConfig> {
        self.bots.get(bot_id)
    }

    /// Number of registered bots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bots.len()
    }

    /// Whether no bots are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }
}
