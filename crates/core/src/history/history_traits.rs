//! Historical store contract.
//!
//! The trait is storage-agnostic. The SQLite implementation lives in
//! `tradecache-storage-sqlite`.

use async_trait::async_trait;

use super::freshness;
use super::history_model::{
    AccountId, CacheStats, ClearSummary, HistoryFilter, HistoryRecord, HistoryTable, SyncCursor,
    UpsertSummary,
};
use super::timestamps::local_now;
use crate::errors::Result;

/// Durable, account-scoped persistence for history records and sync cursors.
#[async_trait]
pub trait HistoricalStoreTrait: Send + Sync {
    /// Insert or replace each record by its natural identity.
    ///
    /// Records are upserted one by one. A record that fails is logged and
    /// counted as skipped; it does not fail the batch. The batch is durable
    /// when this returns.
    async fn upsert_records(&self, records: Vec<HistoryRecord>) -> Result<UpsertSummary>;

    /// Single-record form of [`upsert_records`](Self::upsert_records).
    async fn upsert(&self, record: HistoryRecord) -> Result<UpsertSummary> {
        self.upsert_records(vec![record]).await
    }

    /// Records of `table` for `account_id` matching `filter`, newest first.
    fn query(
        &self,
        table: HistoryTable,
        account_id: AccountId,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryRecord>>;

    fn get_sync_cursor(&self, table: HistoryTable, account_id: AccountId)
        -> Result<Option<SyncCursor>>;

    /// Overwrite the cursor for `(cursor.table, cursor.account_id)`.
    async fn set_sync_cursor(&self, cursor: SyncCursor) -> Result<()>;

    /// Delete records and cursors. `None` means every table or every account.
    async fn clear(
        &self,
        table: Option<HistoryTable>,
        account_id: Option<AccountId>,
    ) -> Result<ClearSummary>;

    /// Number of cached records of `table` for `account_id`.
    fn count(&self, table: HistoryTable, account_id: AccountId) -> Result<i64>;

    fn stats(&self, table: Option<HistoryTable>, account_id: Option<AccountId>)
        -> Result<CacheStats>;

    /// Whether the last sync of `table` is within `threshold_minutes`.
    ///
    /// Evaluated on every call against the current local time.
    fn is_fresh(
        &self,
        table: HistoryTable,
        account_id: AccountId,
        threshold_minutes: i64,
    ) -> Result<bool> {
        let last_sync = self
            .get_sync_cursor(table, account_id)?
            .map(|cursor| cursor.last_sync_at);
        Ok(freshness::is_fresh(last_sync, threshold_minutes, local_now()))
    }
}
