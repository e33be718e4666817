//! Historical record domain models.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::timestamps::parse_record_timestamp;
use crate::errors::Error;
use tradecache_api::{ApiDividend, ApiOrder, ApiTransaction};

/// Account identifier as reported by the brokerage.
pub type AccountId = i64;

/// Order statuses after which an order no longer changes.
pub const TERMINAL_ORDER_STATUSES: &[&str] = &["FILLED", "CANCELLED", "REJECTED"];

/// The three cached record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryTable {
    Orders,
    Dividends,
    Transactions,
}

impl HistoryTable {
    pub const ALL: [HistoryTable; 3] = [
        HistoryTable::Orders,
        HistoryTable::Dividends,
        HistoryTable::Transactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryTable::Orders => "orders",
            HistoryTable::Dividends => "dividends",
            HistoryTable::Transactions => "transactions",
        }
    }

    /// Whether the remote API lets us ask for only newer records.
    ///
    /// Orders have no time filter and are always fetched in full.
    pub fn supports_incremental(&self) -> bool {
        !matches!(self, HistoryTable::Orders)
    }
}

impl fmt::Display for HistoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orders" => Ok(HistoryTable::Orders),
            "dividends" => Ok(HistoryTable::Dividends),
            "transactions" => Ok(HistoryTable::Transactions),
            other => Err(Error::UnknownTable(other.to_string())),
        }
    }
}

fn decimal(value: Option<f64>) -> Option<Decimal> {
    value.and_then(Decimal::from_f64)
}

fn timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = value?;
    let parsed = parse_record_timestamp(raw);
    if parsed.is_none() {
        warn!("Ignoring unparsable record timestamp '{}'", raw);
    }
    parsed
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Historical order, keyed by `(id, account_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: i64,
    pub account_id: AccountId,
    pub ticker: Option<String>,
    pub order_type: Option<String>,
    pub status: Option<String>,
    pub initiated_from: Option<String>,
    pub quantity: Option<Decimal>,
    pub filled_quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub fill_id: Option<i64>,
    pub fill_price: Option<Decimal>,
    pub fill_type: Option<String>,
    pub net_value: Option<Decimal>,
    pub realised_pnl: Option<Decimal>,
    pub taxes: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    /// Payload as received from the API.
    pub raw: Value,
}

impl OrderRecord {
    /// Convert an API order. Returns `None` when the order has no id.
    pub fn from_api(account_id: AccountId, order: ApiOrder) -> Option<Self> {
        let raw = match serde_json::to_value(&order) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping order that cannot be serialized: {}", e);
                return None;
            }
        };

        let details = order.order.unwrap_or_default();
        let Some(id) = details.id else {
            warn!("Skipping order without ID");
            return None;
        };
        let fill = order.fill.unwrap_or_default();
        let wallet = fill.wallet_impact.unwrap_or_default();

        Some(Self {
            id,
            account_id,
            ticker: details.ticker,
            order_type: details.order_type,
            status: details.status,
            initiated_from: details.initiated_from,
            quantity: decimal(details.quantity),
            filled_quantity: decimal(details.filled_quantity.or(fill.quantity)),
            limit_price: decimal(details.limit_price),
            stop_price: decimal(details.stop_price),
            fill_id: fill.id,
            fill_price: decimal(fill.price),
            fill_type: fill.trading_method.or(fill.fill_type),
            net_value: decimal(wallet.net_value),
            realised_pnl: decimal(wallet.realised_profit_loss),
            taxes: wallet.taxes.map(Value::Array),
            created_at: timestamp(details.created_at.as_deref()),
            executed_at: timestamp(fill.filled_at.as_deref()),
            raw,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(is_terminal_status)
    }
}

/// Whether an order in `status` can still change.
pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_ORDER_STATUSES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(status))
}

/// Dividend payment, keyed by `(reference, account_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendRecord {
    pub reference: String,
    pub account_id: AccountId,
    pub ticker: Option<String>,
    pub amount: Option<Decimal>,
    pub amount_in_euro: Option<Decimal>,
    pub gross_amount_per_share: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub dividend_type: Option<String>,
    pub paid_on: Option<DateTime<Utc>>,
    pub raw: Value,
}

impl DividendRecord {
    /// Convert an API dividend. Returns `None` when it has no reference.
    pub fn from_api(account_id: AccountId, dividend: ApiDividend) -> Option<Self> {
        let raw = serde_json::to_value(&dividend)
            .map_err(|e| warn!("Skipping dividend that cannot be serialized: {}", e))
            .ok()?;
        let reference = match dividend.reference {
            Some(reference) if !reference.is_empty() => reference,
            _ => {
                warn!("Skipping dividend without reference");
                return None;
            }
        };

        Some(Self {
            reference,
            account_id,
            ticker: dividend.ticker,
            amount: decimal(dividend.amount),
            amount_in_euro: decimal(dividend.amount_in_euro),
            gross_amount_per_share: decimal(dividend.gross_amount_per_share),
            quantity: decimal(dividend.quantity),
            dividend_type: dividend.dividend_type,
            paid_on: timestamp(dividend.paid_on.as_deref()),
            raw,
        })
    }
}

/// Cash transaction (deposit, withdrawal, fee, transfer), keyed by `(reference, account_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub reference: String,
    pub account_id: AccountId,
    pub transaction_type: Option<String>,
    pub amount: Option<Decimal>,
    pub date_time: Option<DateTime<Utc>>,
    pub raw: Value,
}

impl TransactionRecord {
    /// Convert an API transaction. Returns `None` when it has no reference.
    pub fn from_api(account_id: AccountId, transaction: ApiTransaction) -> Option<Self> {
        let raw = serde_json::to_value(&transaction)
            .map_err(|e| warn!("Skipping transaction that cannot be serialized: {}", e))
            .ok()?;
        let reference = match transaction.reference {
            Some(reference) if !reference.is_empty() => reference,
            _ => {
                warn!("Skipping transaction without reference");
                return None;
            }
        };

        Some(Self {
            reference,
            account_id,
            transaction_type: transaction.transaction_type,
            amount: decimal(transaction.amount),
            date_time: timestamp(transaction.date_time.as_deref()),
            raw,
        })
    }
}

/// Any cached record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HistoryRecord {
    Order(OrderRecord),
    Dividend(DividendRecord),
    Transaction(TransactionRecord),
}

impl HistoryRecord {
    pub fn table(&self) -> HistoryTable {
        match self {
            HistoryRecord::Order(_) => HistoryTable::Orders,
            HistoryRecord::Dividend(_) => HistoryTable::Dividends,
            HistoryRecord::Transaction(_) => HistoryTable::Transactions,
        }
    }

    pub fn account_id(&self) -> AccountId {
        match self {
            HistoryRecord::Order(o) => o.account_id,
            HistoryRecord::Dividend(d) => d.account_id,
            HistoryRecord::Transaction(t) => t.account_id,
        }
    }

    /// Natural identity within the account.
    pub fn identity(&self) -> String {
        match self {
            HistoryRecord::Order(o) => o.id.to_string(),
            HistoryRecord::Dividend(d) => d.reference.clone(),
            HistoryRecord::Transaction(t) => t.reference.clone(),
        }
    }

    /// The record's own timestamp in the remote ordering.
    pub fn cursor_time(&self) -> Option<DateTime<Utc>> {
        match self {
            HistoryRecord::Order(o) => o.created_at,
            HistoryRecord::Dividend(d) => d.paid_on,
            HistoryRecord::Transaction(t) => t.date_time,
        }
    }

    pub fn raw(&self) -> &Value {
        match self {
            HistoryRecord::Order(o) => &o.raw,
            HistoryRecord::Dividend(d) => &d.raw,
            HistoryRecord::Transaction(t) => &t.raw,
        }
    }
}

impl From<OrderRecord> for HistoryRecord {
    fn from(record: OrderRecord) -> Self {
        HistoryRecord::Order(record)
    }
}

impl From<DividendRecord> for HistoryRecord {
    fn from(record: DividendRecord) -> Self {
        HistoryRecord::Dividend(record)
    }
}

impl From<TransactionRecord> for HistoryRecord {
    fn from(record: TransactionRecord) -> Self {
        HistoryRecord::Transaction(record)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cursors, filters, summaries
// ─────────────────────────────────────────────────────────────────────────────

/// Sync bookkeeping for one table of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub table: HistoryTable,
    pub account_id: AccountId,
    /// When the last successful sync finished, local naive time.
    pub last_sync_at: NaiveDateTime,
    /// Newest record timestamp seen so far; the lower bound for the next incremental fetch.
    pub last_cursor: Option<DateTime<Utc>>,
    pub record_count: i64,
}

/// Filters for [`query`](super::HistoricalStoreTrait::query).
///
/// Filters that don't apply to a table are ignored: `status` only applies to
/// orders, `ticker` to orders and dividends, `kind` to dividends and transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    pub ticker: Option<String>,
    pub status: Option<String>,
    /// Dividend type or transaction type.
    pub kind: Option<String>,
    /// Only records at or after this time.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl HistoryFilter {
    pub fn ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` passes every filter that applies to its table.
    ///
    /// With `since` set, records without a timestamp never match.
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        if let Some(since) = self.since {
            if record.cursor_time().map_or(true, |t| t < since) {
                return false;
            }
        }
        match record {
            HistoryRecord::Order(o) => {
                field_matches(&self.ticker, &o.ticker)
                    && self.status.as_ref().map_or(true, |status| {
                        o.status.as_deref() == Some(status.to_ascii_uppercase().as_str())
                    })
            }
            HistoryRecord::Dividend(d) => {
                field_matches(&self.ticker, &d.ticker) && field_matches(&self.kind, &d.dividend_type)
            }
            HistoryRecord::Transaction(t) => field_matches(&self.kind, &t.transaction_type),
        }
    }

    /// Filter, order and truncate records in memory, the same way the store
    /// answers a query: newest first, ties by identity descending, records
    /// without a timestamp last.
    pub fn apply(&self, records: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
        let mut kept: Vec<HistoryRecord> = records.into_iter().filter(|r| self.matches(r)).collect();
        kept.sort_by(|a, b| {
            b.cursor_time()
                .cmp(&a.cursor_time())
                .then_with(|| match (a, b) {
                    (HistoryRecord::Order(x), HistoryRecord::Order(y)) => y.id.cmp(&x.id),
                    _ => b.identity().cmp(&a.identity()),
                })
        });
        if let Some(limit) = self.limit.filter(|l| *l >= 0) {
            kept.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        kept
    }
}

fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
    wanted
        .as_ref()
        .map_or(true, |wanted| actual.as_deref() == Some(wanted.as_str()))
}

/// Result of a batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSummary {
    pub upserted: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for UpsertSummary {
    fn add_assign(&mut self, other: Self) {
        self.upserted += other.upserted;
        self.skipped += other.skipped;
    }
}

/// Rows deleted by a clear, per table (`sync_cursors` included).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSummary {
    pub deleted: BTreeMap<String, usize>,
}

impl ClearSummary {
    pub fn total(&self) -> usize {
        self.deleted.values().sum()
    }

    pub fn deleted_from(&self, table: &str) -> usize {
        self.deleted.get(table).copied().unwrap_or(0)
    }
}

/// Per-table statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub table: HistoryTable,
    pub record_count: i64,
    /// Sum of raw payload sizes, in bytes.
    pub approx_bytes: i64,
    pub last_sync: Option<NaiveDateTime>,
}

/// Statistics about the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub database_path: String,
    pub database_size_bytes: u64,
    pub tables: Vec<TableStats>,
}

impl CacheStats {
    /// Stats reported when the cache is turned off.
    pub fn disabled(database_path: impl Into<String>) -> Self {
        Self {
            enabled: false,
            database_path: database_path.into(),
            database_size_bytes: 0,
            tables: Vec::new(),
        }
    }

    pub fn table(&self, table: HistoryTable) -> Option<&TableStats> {
        self.tables.iter().find(|t| t.table == table)
    }
}
