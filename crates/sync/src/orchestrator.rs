//! History sync orchestrator.
//!
//! Coordinates paginated fetches from the [`HistoryApi`] with store writes
//! and decides per table between a full and an incremental fetch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use tradecache_api::{
    ApiDividend, ApiOrder, ApiTransaction, HistoryApi, Page, PageRequest, PageWalk,
    MAX_ORDERS_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
use tradecache_core::config::DEFAULT_FRESHNESS_MINUTES;
use tradecache_core::errors::{Error, Result};
use tradecache_core::history::{
    local_now, AccountId, DividendRecord, HistoricalStoreTrait, HistoryRecord, HistoryTable,
    OrderRecord, SyncCursor, SyncFailure, SyncMode, SyncReport, TableSyncFailure,
    TableSyncResult, TransactionRecord,
};

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Page size for orders. The endpoint rejects more than 8.
    pub orders_page_limit: u32,
    /// Page size for dividends and transactions.
    pub page_limit: u32,
    /// Maximum number of pages per table (safety limit).
    pub max_pages: usize,
    /// Default threshold for [`SyncOrchestrator::ensure_fresh`].
    pub freshness_minutes: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            orders_page_limit: MAX_ORDERS_PAGE_LIMIT,
            page_limit: MAX_PAGE_LIMIT,
            max_pages: 10_000,
            freshness_minutes: DEFAULT_FRESHNESS_MINUTES,
        }
    }
}

/// One fetched page after conversion to records.
struct FetchedPage {
    records: Vec<HistoryRecord>,
    fetched: usize,
    next: Option<PageRequest>,
}

impl FetchedPage {
    fn from_page<T>(
        page: Page<T>,
        request: &PageRequest,
        convert: impl Fn(T) -> Option<HistoryRecord>,
    ) -> Self {
        let next = page.next_request(request);
        let fetched = page.items.len();
        let records = page.items.into_iter().filter_map(convert).collect();
        Self {
            records,
            fetched,
            next,
        }
    }
}

/// Orchestrates history synchronization for one brokerage account at a time.
///
/// - Orders are always fetched in full; the API has no time filter for them.
/// - Dividends and transactions are fetched from the stored cursor onwards.
/// - Pages are upserted as they arrive, and the cursor is written only once a
///   table finished without a transport failure.
///
/// # Example
///
/// ```ignore
/// let orchestrator = SyncOrchestrator::new(api, store, SyncConfig::default());
/// let report = orchestrator.sync(None, account_id, false).await?;
/// ```
pub struct SyncOrchestrator {
    api: Arc<dyn HistoryApi>,
    store: Arc<dyn HistoricalStoreTrait>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn HistoryApi>,
        store: Arc<dyn HistoricalStoreTrait>,
        config: SyncConfig,
    ) -> Self {
        Self { api, store, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<dyn HistoryApi> {
        &self.api
    }

    /// Sync `tables` (all three when `None`) for `account_id`.
    ///
    /// Tables are independent: a failure in one is recorded and the next table
    /// still runs. If any table failed, [`Error::SyncIncomplete`] carries the
    /// full report.
    pub async fn sync(
        &self,
        tables: Option<&[HistoryTable]>,
        account_id: AccountId,
        force: bool,
    ) -> Result<SyncReport> {
        let mut targets: Vec<HistoryTable> =
            tables.map_or_else(|| HistoryTable::ALL.to_vec(), <[_]>::to_vec);
        targets.sort();
        targets.dedup();

        info!(
            "Starting history sync for account {} (tables: {:?}, force: {})",
            account_id, targets, force
        );

        let mut report = SyncReport::new(account_id);
        let mut failures = Vec::new();

        for table in targets {
            let mut result = TableSyncResult::new(table, SyncMode::Full);
            match self.sync_table(table, account_id, force, &mut result).await {
                Ok(()) => {
                    info!(
                        "Synced {} for account {}: {} fetched, {} upserted, {} cached ({} mode)",
                        table,
                        account_id,
                        result.records_fetched,
                        result.records_upserted,
                        result.total_records,
                        result.mode
                    );
                }
                Err(err) => {
                    error!(
                        "Sync of {} for account {} stopped after {} records: {}",
                        table, account_id, result.records_upserted, err
                    );
                    result.error = Some(err.to_string());
                    failures.push(TableSyncFailure {
                        table,
                        records_upserted: result.records_upserted,
                        error: err,
                    });
                }
            }
            report.tables.push(result);
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(Error::SyncIncomplete(Box::new(SyncFailure { report, failures })))
        }
    }

    /// Sync `table` if it is not fresh under the configured threshold.
    ///
    /// Returns `None` when the cache was fresh.
    pub async fn ensure_fresh(
        &self,
        table: HistoryTable,
        account_id: AccountId,
    ) -> Result<Option<TableSyncResult>> {
        self.ensure_fresh_within(table, account_id, self.config.freshness_minutes)
            .await
    }

    /// Like [`ensure_fresh`](Self::ensure_fresh) with an explicit threshold.
    /// `0` forces a sync now; a negative value only syncs a table that has
    /// never been synced.
    pub async fn ensure_fresh_within(
        &self,
        table: HistoryTable,
        account_id: AccountId,
        threshold_minutes: i64,
    ) -> Result<Option<TableSyncResult>> {
        if self.store.is_fresh(table, account_id, threshold_minutes)? {
            debug!(
                "{} cache for account {} is fresh (threshold {} min)",
                table, account_id, threshold_minutes
            );
            return Ok(None);
        }

        info!(
            "{} cache for account {} is stale, syncing",
            table, account_id
        );
        let report = self.sync(Some(&[table]), account_id, false).await?;
        Ok(report.tables.into_iter().next())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Per-table sync
    // ─────────────────────────────────────────────────────────────────────────

    async fn sync_table(
        &self,
        table: HistoryTable,
        account_id: AccountId,
        force: bool,
        result: &mut TableSyncResult,
    ) -> Result<()> {
        let previous = if force {
            let cleared = self.store.clear(Some(table), Some(account_id)).await?;
            info!(
                "Forced resync of {} for account {}: cleared {} rows",
                table,
                account_id,
                cleared.total()
            );
            None
        } else {
            self.store.get_sync_cursor(table, account_id)?
        };

        let previous_cursor = previous.as_ref().and_then(|c| c.last_cursor);
        let since = previous_cursor.filter(|_| table.supports_incremental());
        result.mode = if since.is_some() {
            SyncMode::Incremental
        } else {
            SyncMode::Full
        };

        let mut request = self.first_request(table, since);
        let mut walk = PageWalk::new(self.config.max_pages);
        let mut newest = previous_cursor;

        loop {
            walk.check_budget()?;

            let page = self.fetch_page(table, account_id, &request).await?;
            result.pages_fetched = walk.page_fetched();
            result.records_fetched += page.fetched;
            result.records_skipped += page.fetched - page.records.len();

            let (kept, reached_cursor) = split_at_cursor(page.records, since);
            newest = kept.iter().filter_map(HistoryRecord::cursor_time).fold(newest, max_time);

            if !kept.is_empty() {
                debug!(
                    "Upserting {} {} for account {} (page {})",
                    kept.len(),
                    table,
                    account_id,
                    result.pages_fetched
                );
                let summary = self.store.upsert_records(kept).await?;
                result.records_upserted += summary.upserted;
                result.records_skipped += summary.skipped;
            }

            if reached_cursor {
                debug!("Reached stored cursor for {}, stopping pagination", table);
                break;
            }

            match walk.follow(&request, page.next)? {
                Some(next) => request = next,
                None => break,
            }
        }

        let record_count = self.store.count(table, account_id)?;
        let cursor = SyncCursor {
            table,
            account_id,
            last_sync_at: local_now(),
            last_cursor: newest,
            record_count,
        };
        self.store.set_sync_cursor(cursor.clone()).await?;

        result.total_records = record_count;
        result.last_sync = Some(cursor.last_sync_at);
        result.last_cursor = cursor.last_cursor;
        Ok(())
    }

    fn first_request(&self, table: HistoryTable, since: Option<DateTime<Utc>>) -> PageRequest {
        match table {
            HistoryTable::Orders => PageRequest::first(self.config.orders_page_limit),
            HistoryTable::Dividends => PageRequest::first(self.config.page_limit),
            HistoryTable::Transactions => {
                PageRequest::first(self.config.page_limit).with_time_from(since)
            }
        }
    }

    async fn fetch_page(
        &self,
        table: HistoryTable,
        account_id: AccountId,
        request: &PageRequest,
    ) -> Result<FetchedPage> {
        let page = match table {
            HistoryTable::Orders => {
                let page = self.api.orders_page(request).await?;
                FetchedPage::from_page(page, request, |order: ApiOrder| {
                    OrderRecord::from_api(account_id, order).map(Into::into)
                })
            }
            HistoryTable::Dividends => {
                let page = self.api.dividends_page(request).await?;
                FetchedPage::from_page(page, request, |dividend: ApiDividend| {
                    DividendRecord::from_api(account_id, dividend).map(Into::into)
                })
            }
            HistoryTable::Transactions => {
                let page = self.api.transactions_page(request).await?;
                FetchedPage::from_page(page, request, |txn: ApiTransaction| {
                    TransactionRecord::from_api(account_id, txn).map(Into::into)
                })
            }
        };

        if page.records.len() < page.fetched {
            warn!(
                "Skipped {} {} without identity for account {}",
                page.fetched - page.records.len(),
                table,
                account_id
            );
        }
        Ok(page)
    }
}

fn max_time(acc: Option<DateTime<Utc>>, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(acc.map_or(t, |a| a.max(t)))
}

/// Keep records at or after `since`. The flag is true when the page also held
/// older records, meaning later pages are entirely behind the cursor.
///
/// Records without a timestamp are kept; re-upserting them is harmless.
fn split_at_cursor(
    records: Vec<HistoryRecord>,
    since: Option<DateTime<Utc>>,
) -> (Vec<HistoryRecord>, bool) {
    let Some(since) = since else {
        return (records, false);
    };

    let mut reached = false;
    let kept = records
        .into_iter()
        .filter(|record| match record.cursor_time() {
            Some(t) if t < since => {
                reached = true;
                false
            }
            _ => true,
        })
        .collect();
    (kept, reached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn txn(reference: &str, hour: u32) -> HistoryRecord {
        let api = serde_json::from_value(json!({
            "reference": reference,
            "dateTime": Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap().to_rfc3339(),
        }))
        .unwrap();
        TransactionRecord::from_api(1, api).unwrap().into()
    }

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.orders_page_limit, 8);
        assert_eq!(config.page_limit, 50);
        assert_eq!(config.max_pages, 10_000);
        assert_eq!(config.freshness_minutes, 60);
    }

    #[test]
    fn test_split_keeps_records_at_cursor() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let (kept, reached) = split_at_cursor(vec![txn("a", 12), txn("b", 10), txn("c", 9)], Some(since));
        let refs: Vec<_> = kept.iter().map(HistoryRecord::identity).collect();
        assert_eq!(refs, vec!["a", "b"]);
        assert!(reached);
    }

    #[test]
    fn test_split_without_cursor_keeps_everything() {
        let (kept, reached) = split_at_cursor(vec![txn("a", 12), txn("b", 1)], None);
        assert_eq!(kept.len(), 2);
        assert!(!reached);
    }

    #[test]
    fn test_max_time_never_regresses() {
        let later = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(max_time(Some(later), earlier), Some(later));
        assert_eq!(max_time(None, earlier), Some(earlier));
    }
}
