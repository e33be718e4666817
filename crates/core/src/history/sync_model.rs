//! Sync outcome models.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history_model::{AccountId, HistoryTable};
use crate::errors::Error;

/// How a table was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Every page from the newest record back to the oldest.
    Full,
    /// Only records at or after the stored cursor.
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Outcome for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSyncResult {
    pub table: HistoryTable,
    pub mode: SyncMode,
    pub pages_fetched: usize,
    pub records_fetched: usize,
    pub records_upserted: usize,
    pub records_skipped: usize,
    /// Rows in the table for this account after the sync.
    pub total_records: i64,
    pub last_sync: Option<NaiveDateTime>,
    pub last_cursor: Option<DateTime<Utc>>,
    /// Message of the failure that stopped this table, if any.
    pub error: Option<String>,
}

impl TableSyncResult {
    pub fn new(table: HistoryTable, mode: SyncMode) -> Self {
        Self {
            table,
            mode,
            pages_fetched: 0,
            records_fetched: 0,
            records_upserted: 0,
            records_skipped: 0,
            total_records: 0,
            last_sync: None,
            last_cursor: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a sync across one or more tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub account_id: AccountId,
    pub tables: Vec<TableSyncResult>,
}

impl SyncReport {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            tables: Vec::new(),
        }
    }

    pub fn table(&self, table: HistoryTable) -> Option<&TableSyncResult> {
        self.tables.iter().find(|r| r.table == table)
    }

    pub fn records_upserted(&self) -> usize {
        self.tables.iter().map(|r| r.records_upserted).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.tables.iter().all(TableSyncResult::succeeded)
    }
}

/// A table that stopped early. Whatever was upserted before the failure stays committed.
#[derive(Debug)]
pub struct TableSyncFailure {
    pub table: HistoryTable,
    pub records_upserted: usize,
    pub error: Error,
}

/// Returned when at least one table failed. Carries the full report so
/// callers can see what did succeed.
#[derive(Debug)]
pub struct SyncFailure {
    pub report: SyncReport,
    pub failures: Vec<TableSyncFailure>,
}

impl SyncFailure {
    pub fn failed_tables(&self) -> Vec<HistoryTable> {
        self.failures.iter().map(|f| f.table).collect()
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sync incomplete for account {}:", self.report.account_id)?;
        for failure in &self.failures {
            write!(
                f,
                " {} failed after {} records ({});",
                failure.table, failure.records_upserted, failure.error
            )?;
        }
        Ok(())
    }
}
