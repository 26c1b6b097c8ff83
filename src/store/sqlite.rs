//! SQLite-backed subscription store.

use super::{Subscription, SubscriptionStore, TransactionClaim};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SELECT_COLUMNS: &str =
    "SELECT user_id, bot_id, bot_display_name, payer_address, created_at, expires_at
     FROM bot_subscriptions";

/// Subscription store persisted in a SQLite file.
///
/// Calls run on the blocking pool; the connection is serialized behind a mutex.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `:memory:` opens a private
    /// in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bot_subscriptions (
                user_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                bot_display_name TEXT NOT NULL,
                payer_address TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, bot_id)
            );
            CREATE TABLE IF NOT EXISTS transaction_claims (
                tx_ref TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                redeemed_at INTEGER NOT NULL
            );",
        )?;
        info!("Subscription store opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let outcome = tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| Error::Store(format!("store task failed: {e}")))?;
        Ok(outcome?)
    }
}

fn from_millis(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, millis))
}

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        user_id: row.get(0)?,
        bot_id: row.get(1)?,
        bot_display_name: row.get(2)?,
        payer_address: row.get(3)?,
        created_at: from_millis(4, row.get(4)?)?,
        expires_at: from_millis(5, row.get(5)?)?,
    })
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn upsert(&self, subscription: Subscription) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO bot_subscriptions
                    (user_id, bot_id, bot_display_name, payer_address, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, bot_id) DO UPDATE SET
                    bot_display_name = excluded.bot_display_name,
                    payer_address = excluded.payer_address,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at",
                params![
                    subscription.user_id,
                    subscription.bot_id,
                    subscription.bot_display_name,
                    subscription.payer_address,
                    subscription.created_at.timestamp_millis(),
                    subscription.expires_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, user_id: &str, bot_id: &str) -> Result<Option<Subscription>> {
        let (user_id, bot_id) = (user_id.to_string(), bot_id.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE user_id = ?1 AND bot_id = ?2"),
                params![user_id, bot_id],
                row_to_subscription,
            )
            .optional()
        })
        .await
    }

    async fn delete(&self, user_id: &str, bot_id: &str) -> Result<bool> {
        let (user_id, bot_id) = (user_id.to_string(), bot_id.to_string());
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "DELETE FROM bot_subscriptions WHERE user_id = ?1 AND bot_id = ?2",
                params![user_id, bot_id],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY expires_at"))?;
            let rows = stmt.query_map([], row_to_subscription)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now.timestamp_millis();
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "DELETE FROM bot_subscriptions WHERE expires_at <= ?1",
                params![cutoff],
            )?;
            Ok(rows as u64)
        })
        .await
    }

    async fn delete_if_unchanged(&self, subscription: &Subscription) -> Result<bool> {
        let sub = subscription.clone();
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "DELETE FROM bot_subscriptions
                 WHERE user_id = ?1 AND bot_id = ?2 AND payer_address = ?3 AND expires_at = ?4",
                params![
                    sub.user_id,
                    sub.bot_id,
                    sub.payer_address,
                    sub.expires_at.timestamp_millis(),
                ],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    async fn claim_transaction(&self, claim: TransactionClaim) -> Result<TransactionClaim> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO transaction_claims (tx_ref, user_id, bot_id, redeemed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(tx_ref) DO NOTHING",
                params![
                    claim.tx_ref,
                    claim.user_id,
                    claim.bot_id,
                    claim.redeemed_at.timestamp_millis(),
                ],
            )?;
            conn.query_row(
                "SELECT tx_ref, user_id, bot_id, redeemed_at
                 FROM transaction_claims WHERE tx_ref = ?1",
                params![claim.tx_ref],
                |row| {
                    Ok(TransactionClaim {
                        tx_ref: row.get(0)?,
                        user_id: row.get(1)?,
                        bot_id: row.get(2)?,
                        redeemed_at: from_millis(3, row.get(3)?)?,
                    })
                },
            )
        })
        .await
    }
}
