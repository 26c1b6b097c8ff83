//! Serializable views of access outcomes for the messaging and web layers.

use super::{AccessError, AccessStatus, Grant, GrantStatus};
use crate::registry::BotConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How to pay for a bot, attached when a payment was refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentDetails {
    /// NCH the bot costs.
    pub required_amount: f64,
    /// Where to send it.
    pub payment_address: String,
}

/// Reply to a grant request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrantResponse {
    /// Whether the user now has access.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Bot name, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_display_name: Option<String>,
    /// The bot's payment address, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_address: Option<String>,
    /// End of access, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when the user has to (re)send a payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_payment: Option<bool>,
    /// Payment instructions, when a payment is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_details: Option<PaymentDetails>,
}

impl GrantResponse {
    fn refused(message: String) -> Self {
        Self {
            success: false,
            message,
            bot_display_name: None,
            payment_address: None,
            expires_at: None,
            requires_payment: None,
            payment_details: None,
        }
    }

    fn payment_needed(message: String, bot: Option<&BotConfig>) -> Self {
        Self {
            requires_payment: Some(true),
            payment_details: bot.map(|bot| PaymentDetails {
                required_amount: bot.required_payment_amount,
                payment_address: bot.payment_address.clone(),
            }),
            ..Self::refused(message)
        }
    }

    /// Render a grant outcome. `bot` supplies payment instructions on refusal.
    #[must_use]
    pub fn from_outcome(outcome: &Result<Grant, AccessError>, bot: Option<&BotConfig>) -> Self {
        match outcome {
            Ok(grant) => Self {
                success: true,
                message: match grant.status {
                    GrantStatus::Granted => "Bot access granted".to_string(),
                    GrantStatus::AlreadyActive => {
                        "You already have an active subscription".to_string()
                    }
                },
                bot_display_name: Some(grant.bot_display_name.clone()),
                payment_address: Some(grant.payment_address.clone()),
                expires_at: Some(grant.expires_at),
                requires_payment: None,
                payment_details: None,
            },
            Err(AccessError::ConfigNotFound(bot_id)) => Self::refused(format!("Invalid bot: {bot_id}")),
            Err(AccessError::TransactionInvalid(reason)) => {
                Self::payment_needed(format!("Invalid transaction: {reason}"), bot)
            }
            Err(AccessError::BalanceInsufficient { minimum, .. }) => Self::refused(format!(
                "Insufficient NESS balance: the paying address must hold at least {minimum} NESS"
            )),
            Err(AccessError::VerificationSourceUnreachable) => Self::refused(
                "Payment could not be verified right now, please retry with the same transaction"
                    .to_string(),
            ),
            Err(AccessError::Persistence(_)) => {
                Self::refused("Something went wrong on our side, please retry".to_string())
            }
        }
    }
}

/// Reply to an access probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessResponse {
    /// Whether access is active.
    pub access: bool,
    /// Expiry of the live subscription.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Human-readable status.
    pub message: String,
}

impl From<AccessStatus> for AccessResponse {
    fn from(status: AccessStatus) -> Self {
        let message = match status.expires_at {
            Some(expires_at) if status.access => format!("Access active until {expires_at}"),
            _ => "No active subscription".to_string(),
        };
        Self {
            access: status.access,
            expires_at: status.expires_at,
            message,
        }
    }
}
