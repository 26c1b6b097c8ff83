//! Block explorer scraping source.
//!
//! Fallback for when the node RPC is unavailable. The explorer renders
//! transaction and address pages; the fields we need are located through a
//! declarative table of [`PageField`] to [`Locator`], and each field is given
//! a bounded time to appear, reloading the page between attempts.
//!
//! Pages are loaded through a [`PageProvider`], which hands out one
//! [`PageSession`] per call. Sessions are never shared: a semaphore bounds
//! how many exist at once, and both the permit and the session are dropped on
//! every exit path, including cancellation of the calling future.
//!
//! A call's deadline starts once it holds a session. Waiting for a free
//! session is not an explorer failure and is never reported as one.

use super::source::{BalanceSource, NamedSource, TransactionSource};
use super::{SourceError, TransactionReport, TxStatus};
use crate::config::ExplorerConfig;
use crate::error::{Error, Result};
use crate::registry::BotConfig;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A value scraped from an explorer page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageField {
    /// Transaction confirmation status.
    Status,
    /// Transaction sender address.
    Sender,
    /// Transaction receiver address.
    Receiver,
    /// Transferred amount.
    Amount,
    /// Address balance.
    Balance,
}

impl fmt::Display for PageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Status => "status",
            Self::Sender => "sender",
            Self::Receiver => "receiver",
            Self::Amount => "amount",
            Self::Balance => "balance",
        };
        f.write_str(name)
    }
}

/// Finds one field's rendered text in a page.
#[derive(Debug, Clone)]
pub struct Locator {
    pattern: Regex,
}

impl Locator {
    /// Locate the text rendered in the element following a label such as
    /// `<div>Status:</div><div><span>Confirmed</span></div>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting pattern does not compile.
    pub fn labelled(label: &str) -> std::result::Result<Self, regex::Error> {
        let pattern = format!(
            r"(?is)>\s*{}\s*:?\s*(?:<[^>]*>\s*)+([^<]+?)\s*<",
            regex::escape(label)
        );
        Self::pattern(&pattern)
    }

    /// Locate with a custom pattern; capture group 1 is the value.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn pattern(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// The field's text, if rendered.
    #[must_use]
    pub fn extract(&self, page: &str) -> Option<String> {
        self.pattern
            .captures(page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Where each field lives on the explorer's pages.
#[derive(Debug, Clone)]
pub struct ExplorerLayout {
    transaction: Vec<(PageField, Locator)>,
    balance: Vec<(PageField, Locator)>,
}

impl ExplorerLayout {
    /// Build locators from configured labels.
    ///
    /// # Errors
    ///
    /// Returns an error if a locator fails to compile.
    pub fn from_config(config: &ExplorerConfig) -> Result<Self> {
        let labelled = |field: PageField, label: &str| {
            Locator::labelled(label)
                .map(|l| (field, l))
                .map_err(|e| Error::Config(format!("bad {field} locator: {e}")))
        };
        let labels = &config.tx_labels;
        Ok(Self {
            transaction: vec![
                labelled(PageField::Status, &labels.status)?,
                labelled(PageField::Sender, &labels.sender)?,
                labelled(PageField::Receiver, &labels.receiver)?,
                labelled(PageField::Amount, &labels.amount)?,
            ],
            balance: vec![labelled(PageField::Balance, &config.balance_label)?],
        })
    }
}

/// Normalize rendered numeric text such as `3,000.000000 NCH` to a number.
///
/// Grouping separators and whitespace are removed, then everything from the
/// first non-numeric character (the unit suffix) on is dropped.
#[must_use]
pub fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | '\'') && !c.is_whitespace())
        .collect();
    let end = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(cleaned.len());
    cleaned[..end]
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Opens page-loading sessions.
#[async_trait]
pub trait PageProvider: Send + Sync {
    /// Open a session owned by a single call.
    async fn open_session(&self) -> std::result::Result<Box<dyn PageSession>, SourceError>;
}

/// A single-owner page loader.
#[async_trait]
pub trait PageSession: Send {
    /// Load `url` and return the rendered document.
    async fn load(&mut self, url: &str) -> std::result::Result<String, SourceError>;
}

/// Page provider that fetches documents over HTTP.
pub struct HttpPageProvider {
    client: reqwest::Client,
    timeout: Duration,
}

struct HttpPageSession {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPageProvider {
    /// Create a provider whose page loads time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build explorer client: {e}")))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl PageProvider for HttpPageProvider {
    async fn open_session(&self) -> std::result::Result<Box<dyn PageSession>, SourceError> {
        Ok(Box::new(HttpPageSession {
            client: self.client.clone(),
            timeout: self.timeout,
        }))
    }
}

#[async_trait]
impl PageSession for HttpPageSession {
    async fn load(&mut self, url: &str) -> std::result::Result<String, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(self.timeout)
                } else {
                    SourceError::Unreachable(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))
    }
}

/// Session and timing bounds of a [`ScrapeSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeLimits {
    /// Concurrently open sessions (minimum 1).
    pub max_sessions: usize,
    /// Ceiling for one page load.
    pub load_timeout: Duration,
    /// How long a field may take to render.
    pub field_timeout: Duration,
    /// Delay between reloads while a field is missing.
    pub poll_interval: Duration,
}

impl ScrapeLimits {
    /// Limits from the `[explorer]` section.
    #[must_use]
    pub fn from_config(config: &ExplorerConfig) -> Self {
        Self {
            max_sessions: config.max_sessions.max(1),
            load_timeout: Duration::from_secs(config.request_timeout_secs),
            field_timeout: Duration::from_secs(config.field_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Longest a scrape of `fields` fields can take once it holds a session:
    /// the first load plus, per field, its render wait and one reload in
    /// flight at the deadline.
    #[must_use]
    pub fn call_budget(&self, fields: usize) -> Duration {
        let fields = u32::try_from(fields).unwrap_or(u32::MAX);
        (self.field_timeout + self.load_timeout)
            .saturating_mul(fields)
            .saturating_add(self.load_timeout)
    }
}

/// Explorer-backed transaction and balance source.
///
/// Bounds its own calls; add it to a chain with
/// [`SourceChain::push_self_bounded`](super::SourceChain::push_self_bounded).
pub struct ScrapeSource {
    provider: Arc<dyn PageProvider>,
    base_url: String,
    layout: ExplorerLayout,
    sessions: Semaphore,
    limits: ScrapeLimits,
}

impl ScrapeSource {
    /// Create a scraping source.
    #[must_use]
    pub fn new(
        provider: Arc<dyn PageProvider>,
        base_url: String,
        layout: ExplorerLayout,
        limits: ScrapeLimits,
    ) -> Self {
        Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            layout,
            sessions: Semaphore::new(limits.max_sessions.max(1)),
            limits,
        }
    }

    /// Sessions that could be opened right now.
    #[must_use]
    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }

    fn transaction_url(&self, tx_ref: &str) -> String {
        format!("{}/app/transaction/{tx_ref}", self.base_url)
    }

    fn address_url(&self, address: &str) -> String {
        format!("{}/app/address/{address}/1", self.base_url)
    }

    /// Wait for a free session, then scrape `url` within the call budget.
    async fn scrape(
        &self,
        url: &str,
        fields: &[(PageField, Locator)],
    ) -> std::result::Result<HashMap<PageField, String>, SourceError> {
        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|_| SourceError::Unreachable("session pool closed".into()))?;

        let budget = self.limits.call_budget(fields.len());
        tokio::time::timeout(budget, self.scrape_in_session(url, fields))
            .await
            .unwrap_or(Err(SourceError::Timeout(budget)))
    }

    /// Load `url` in a fresh session and wait for every field in `fields`.
    async fn scrape_in_session(
        &self,
        url: &str,
        fields: &[(PageField, Locator)],
    ) -> std::result::Result<HashMap<PageField, String>, SourceError> {
        let mut session = self.provider.open_session().await?;

        debug!("Scraping {url}");
        let mut page = session.load(url).await?;
        let mut values = HashMap::with_capacity(fields.len());

        for (field, locator) in fields {
            let deadline = Instant::now() + self.limits.field_timeout;
            loop {
                if let Some(value) = locator.extract(&page) {
                    values.insert(*field, value);
                    break;
                }
                if Instant::now() >= deadline {
                    warn!("Field {field} did not render on {url}");
                    return Err(SourceError::FieldTimeout(*field, self.limits.field_timeout));
                }
                tokio::time::sleep(self.limits.poll_interval).await;
                page = session.load(url).await?;
            }
        }

        Ok(values)
    }
}

fn take(
    values: &mut HashMap<PageField, String>,
    field: PageField,
) -> std::result::Result<String, SourceError> {
    values
        .remove(&field)
        .ok_or_else(|| SourceError::Malformed(format!("{field} missing")))
}

fn amount_field(text: &str, field: PageField) -> std::result::Result<f64, SourceError> {
    parse_amount(text).ok_or_else(|| SourceError::Malformed(format!("{field} is not a number: {text}")))
}

impl NamedSource for ScrapeSource {
    fn name(&self) -> &str {
        "explorer"
    }
}

#[async_trait]
impl TransactionSource for ScrapeSource {
    async fn fetch_transaction(
        &self,
        tx_ref: &str,
        _bot: &BotConfig,
    ) -> std::result::Result<TransactionReport, SourceError> {
        let url = self.transaction_url(tx_ref);
        let mut values = self.scrape(&url, &self.layout.transaction).await?;

        let amount_text = take(&mut values, PageField::Amount)?;
        Ok(TransactionReport {
            tx_ref: tx_ref.to_string(),
            status: TxStatus::from_label(&take(&mut values, PageField::Status)?),
            sender: take(&mut values, PageField::Sender)?,
            receiver: take(&mut values, PageField::Receiver)?,
            amount: amount_field(&amount_text, PageField::Amount)?,
        })
    }
}

#[async_trait]
impl BalanceSource for ScrapeSource {
    async fn fetch_balance(&self, address: &str) -> std::result::Result<f64, SourceError> {
        let url = self.address_url(address);
        let mut values = self.scrape(&url, &self.layout.balance).await?;
        let text = take(&mut values, PageField::Balance)?;
        amount_field(&text, PageField::Balance)
    }
}
