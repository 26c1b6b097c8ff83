//! Chain node JSON-RPC source.
//!
//! Primary, authoritative source. Every failure here (transport, HTTP status,
//! decode, node-reported error) is soft and hands over to the next source.

use super::explorer::parse_amount;
use super::source::{BalanceSource, NamedSource, TransactionSource};
use super::{SourceError, TransactionReport, TxStatus};
use crate::error::{Error, Result};
use crate::registry::BotConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const VALIDATE_TRANSACTION: &str = "validate_transaction";
const GET_WALLET_BALANCE: &str = "get_wallet_balance";

/// JSON-RPC client for the chain node.
pub struct RpcSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<R> {
    result: Option<R>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    status: String,
    from_address: String,
    to_address: String,
    #[serde(deserialize_with = "amount_from_json")]
    amount: f64,
}

#[derive(Debug, Deserialize)]
struct RpcBalance {
    #[serde(deserialize_with = "amount_from_json")]
    ness_balance: f64,
}

fn amount_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let amount = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    };
    amount.ok_or_else(|| serde::de::Error::custom(format!("not an amount: {value}")))
}

fn describe_rpc_error(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string),
        other => other.to_string(),
    }
}

/// Unwrap a JSON-RPC response body into its result.
fn decode_envelope<R: DeserializeOwned>(body: Value) -> std::result::Result<R, SourceError> {
    let envelope: RpcEnvelope<Value> =
        serde_json::from_value(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    if let Some(error) = envelope.error.filter(|e| !e.is_null()) {
        return Err(SourceError::Rpc(describe_rpc_error(&error)));
    }

    let result = envelope
        .result
        .ok_or_else(|| SourceError::Malformed("response has neither result nor error".into()))?;
    serde_json::from_value(result).map_err(|e| SourceError::Malformed(e.to_string()))
}

impl RpcSource {
    /// Create a client for the node at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build RPC client: {e}")))?;

        debug!("RPC source targeting {url}");
        Ok(Self {
            client,
            url,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<R, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?
            .error_for_status()
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("{method}: {e}")))?;

        decode_envelope(payload)
    }

    fn transport_error(&self, e: &reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.timeout)
        } else {
            SourceError::Unreachable(e.to_string())
        }
    }
}

impl NamedSource for RpcSource {
    fn name(&self) -> &str {
        "rpc"
    }
}

#[async_trait]
impl TransactionSource for RpcSource {
    async fn fetch_transaction(
        &self,
        tx_ref: &str,
        bot: &BotConfig,
    ) -> std::result::Result<TransactionReport, SourceError> {
        let tx: RpcTransaction = self
            .call(
                VALIDATE_TRANSACTION,
                json!({
                    "tx_hash": tx_ref,
                    "required_amount": bot.required_payment_amount,
                    "payment_address": bot.payment_address,
                }),
            )
            .await?;

        Ok(TransactionReport {
            tx_ref: tx_ref.to_string(),
            status: TxStatus::from_label(&tx.status),
            sender: tx.from_address,
            receiver: tx.to_address,
            amount: tx.amount,
        })
    }
}

#[async_trait]
impl BalanceSource for RpcSource {
    async fn fetch_balance(&self, address: &str) -> std::result::Result<f64, SourceError> {
        let balance: RpcBalance = self
            .call(GET_WALLET_BALANCE, json!({ "address": address }))
            .await?;
        Ok(balance.ness_balance)
    }
}
