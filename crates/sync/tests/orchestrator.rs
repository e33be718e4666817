//! Sync orchestrator tests against a scripted API and a real SQLite cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::TempDir;

use tradecache_api::{
    AccountInfo, ApiDividend, ApiError, ApiOrder, ApiTransaction, HistoryApi, Page, PageRequest,
};
use tradecache_core::config::CacheConfig;
use tradecache_core::errors::Error;
use tradecache_core::history::{
    HistoricalStoreTrait, HistoryFilter, HistoryRecord, HistoryTable, SyncMode,
};
use tradecache_storage_sqlite::SqliteHistoryStore;
use tradecache_sync::{HistoryService, SyncConfig, SyncOrchestrator};

const ACCOUNT: i64 = 4242;

// ==================== Scripted API ====================

/// Serves fixed record lists (newest first) in pages of `page_size`, using the
/// offset as the cursor. Transactions honor the `time` filter.
struct FakeHistoryApi {
    page_size: usize,
    orders: Mutex<Vec<ApiOrder>>,
    dividends: Mutex<Vec<ApiDividend>>,
    transactions: Mutex<Vec<ApiTransaction>>,
    calls: Mutex<Vec<(HistoryTable, PageRequest)>>,
    failures: Mutex<HashMap<(HistoryTable, usize), ApiError>>,
}

impl FakeHistoryApi {
    fn new(page_size: usize) -> Self {
        Self {
            page_size,
            orders: Mutex::new(Vec::new()),
            dividends: Mutex::new(Vec::new()),
            transactions: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the `call`-th request (1-based, counted over the whole test) for `table`.
    fn fail_on(&self, table: HistoryTable, call: usize, error: ApiError) {
        self.failures.lock().unwrap().insert((table, call), error);
    }

    fn calls_for(&self, table: HistoryTable) -> Vec<PageRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == table)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn record_call(&self, table: HistoryTable, request: &PageRequest) -> Result<(), ApiError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((table, request.clone()));
        let n = calls.iter().filter(|(t, _)| *t == table).count();
        match self.failures.lock().unwrap().remove(&(table, n)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn page<T: Clone>(&self, items: &[T], request: &PageRequest, path: &str) -> Page<T> {
        let offset: usize = request
            .cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let end = (offset + self.page_size).min(items.len());
        let next = (end < items.len())
            .then(|| format!("/api/v0{}?limit={}&cursor={}", path, self.page_size, end));
        Page::new(items[offset.min(end)..end].to_vec(), next)
    }
}

#[async_trait]
impl HistoryApi for FakeHistoryApi {
    async fn account_info(&self) -> Result<AccountInfo, ApiError> {
        Ok(AccountInfo {
            id: ACCOUNT,
            currency_code: Some("EUR".to_string()),
        })
    }

    async fn orders_page(&self, request: &PageRequest) -> Result<Page<ApiOrder>, ApiError> {
        self.record_call(HistoryTable::Orders, request)?;
        let items = self.orders.lock().unwrap().clone();
        Ok(self.page(&items, request, "/equity/history/orders"))
    }

    async fn dividends_page(&self, request: &PageRequest) -> Result<Page<ApiDividend>, ApiError> {
        self.record_call(HistoryTable::Dividends, request)?;
        let items = self.dividends.lock().unwrap().clone();
        Ok(self.page(&items, request, "/history/dividends"))
    }

    async fn transactions_page(
        &self,
        request: &PageRequest,
    ) -> Result<Page<ApiTransaction>, ApiError> {
        self.record_call(HistoryTable::Transactions, request)?;
        let time_from = request
            .time_from
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok());
        let items: Vec<ApiTransaction> = self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|txn| match (time_from, txn.date_time.as_deref()) {
                (Some(from), Some(at)) => DateTime::parse_from_rfc3339(at).unwrap() >= from,
                _ => true,
            })
            .cloned()
            .collect();
        Ok(self.page(&items, request, "/history/transactions"))
    }
}

// ==================== Fixtures ====================

fn ts(day: u32, hour: u32) -> String {
    format!("2024-05-{:02}T{:02}:00:00Z", day, hour)
}

fn api_order(id: i64, status: &str, day: u32) -> ApiOrder {
    serde_json::from_value(json!({
        "order": {
            "id": id,
            "ticker": "AAPL_US_EQ",
            "type": "MARKET",
            "status": status,
            "quantity": 1.0,
            "createdAt": ts(day, 9)
        },
        "fill": { "id": id + 100, "price": 180.5, "filledAt": ts(day, 9) }
    }))
    .unwrap()
}

fn api_dividend(reference: &str, day: u32) -> ApiDividend {
    serde_json::from_value(json!({
        "reference": reference,
        "ticker": "MSFT_US_EQ",
        "amount": 0.75,
        "type": "ORDINARY",
        "paidOn": ts(day, 0)
    }))
    .unwrap()
}

fn api_transaction(reference: &str, day: u32) -> ApiTransaction {
    serde_json::from_value(json!({
        "reference": reference,
        "type": "DEPOSIT",
        "amount": 100.0,
        "dateTime": ts(day, 12)
    }))
    .unwrap()
}

struct Harness {
    api: Arc<FakeHistoryApi>,
    store: Arc<SqliteHistoryStore>,
    orchestrator: Arc<SyncOrchestrator>,
    _dir: TempDir,
}

fn harness(page_size: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");
    let store = Arc::new(SqliteHistoryStore::open(&path.to_string_lossy()).unwrap());
    let api = Arc::new(FakeHistoryApi::new(page_size));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        api.clone(),
        store.clone(),
        SyncConfig::default(),
    ));
    Harness {
        api,
        store,
        orchestrator,
        _dir: dir,
    }
}

/// 5 orders, 4 dividends and 6 transactions, newest first.
fn seed(api: &FakeHistoryApi) {
    *api.orders.lock().unwrap() = (1..=5)
        .rev()
        .map(|i| api_order(i, "FILLED", i as u32))
        .collect();
    *api.dividends.lock().unwrap() = (1..=4)
        .rev()
        .map(|i| api_dividend(&format!("div-{}", i), i))
        .collect();
    *api.transactions.lock().unwrap() = (1..=6)
        .rev()
        .map(|i| api_transaction(&format!("txn-{}", i), i))
        .collect();
}

fn identities(records: &[HistoryRecord]) -> Vec<String> {
    records.iter().map(HistoryRecord::identity).collect()
}

fn expect_incomplete(err: Error) -> Box<tradecache_core::history::SyncFailure> {
    match err {
        Error::SyncIncomplete(failure) => failure,
        other => panic!("expected SyncIncomplete, got {:?}", other),
    }
}

// ==================== Sync ====================

#[tokio::test]
async fn test_initial_sync_caches_every_table() {
    let h = harness(2);
    seed(&h.api);

    let report = h.orchestrator.sync(None, ACCOUNT, false).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.tables.len(), 3);
    let orders = report.table(HistoryTable::Orders).unwrap();
    assert_eq!(orders.mode, SyncMode::Full);
    assert_eq!(orders.pages_fetched, 3);
    assert_eq!(orders.records_upserted, 5);
    assert_eq!(orders.total_records, 5);

    assert_eq!(h.store.count(HistoryTable::Dividends, ACCOUNT).unwrap(), 4);
    assert_eq!(h.store.count(HistoryTable::Transactions, ACCOUNT).unwrap(), 6);

    let cursor = h
        .store
        .get_sync_cursor(HistoryTable::Dividends, ACCOUNT)
        .unwrap()
        .unwrap();
    assert_eq!(cursor.record_count, 4);
    assert_eq!(
        cursor.last_cursor,
        Some(ts(4, 0).parse::<DateTime<Utc>>().unwrap())
    );

    let dividends = h
        .store
        .query(HistoryTable::Dividends, ACCOUNT, &HistoryFilter::default())
        .unwrap();
    assert_eq!(identities(&dividends), vec!["div-4", "div-3", "div-2", "div-1"]);
}

#[tokio::test]
async fn test_repeated_sync_is_idempotent() {
    let h = harness(2);
    seed(&h.api);

    h.orchestrator.sync(None, ACCOUNT, false).await.unwrap();
    h.orchestrator.sync(None, ACCOUNT, false).await.unwrap();

    assert_eq!(h.store.count(HistoryTable::Orders, ACCOUNT).unwrap(), 5);
    assert_eq!(h.store.count(HistoryTable::Dividends, ACCOUNT).unwrap(), 4);
    assert_eq!(h.store.count(HistoryTable::Transactions, ACCOUNT).unwrap(), 6);
}

#[tokio::test]
async fn test_orders_full_dividends_incremental() {
    let h = harness(2);
    seed(&h.api);
    h.orchestrator.sync(None, ACCOUNT, false).await.unwrap();
    let order_calls_before = h.api.calls_for(HistoryTable::Orders).len();
    let dividend_calls_before = h.api.calls_for(HistoryTable::Dividends).len();

    h.api
        .dividends
        .lock()
        .unwrap()
        .insert(0, api_dividend("div-5", 5));
    h.api
        .transactions
        .lock()
        .unwrap()
        .insert(0, api_transaction("txn-7", 7));

    let report = h.orchestrator.sync(None, ACCOUNT, false).await.unwrap();

    // Orders: same full walk, no time filter.
    let orders = report.table(HistoryTable::Orders).unwrap();
    assert_eq!(orders.mode, SyncMode::Full);
    let order_calls = h.api.calls_for(HistoryTable::Orders);
    assert_eq!(order_calls.len() - order_calls_before, 3);
    assert!(order_calls.iter().all(|r| r.time_from.is_none()));
    assert_eq!(orders.records_upserted, 5);

    // Dividends: page 1 is div-5, div-4; page 2 is older than the cursor and ends the walk.
    let dividends = report.table(HistoryTable::Dividends).unwrap();
    assert_eq!(dividends.mode, SyncMode::Incremental);
    assert_eq!(
        h.api.calls_for(HistoryTable::Dividends).len() - dividend_calls_before,
        2
    );
    // div-5 is new, div-4 sits exactly on the cursor and is re-upserted.
    assert_eq!(dividends.records_upserted, 2);
    assert_eq!(dividends.total_records, 5);
    assert_eq!(
        dividends.last_cursor,
        Some(ts(5, 0).parse::<DateTime<Utc>>().unwrap())
    );

    // Transactions: server-side filter from the stored cursor.
    let txn_calls = h.api.calls_for(HistoryTable::Transactions);
    let last = txn_calls.last().unwrap();
    assert_eq!(last.time_from.as_deref(), Some("2024-05-06T12:00:00Z"));
    let transactions = report.table(HistoryTable::Transactions).unwrap();
    assert_eq!(transactions.mode, SyncMode::Incremental);
    assert_eq!(transactions.records_upserted, 2);
    assert_eq!(transactions.total_records, 7);
}

#[tokio::test]
async fn test_cursor_never_regresses_on_empty_fetch() {
    let h = harness(2);
    seed(&h.api);
    h.orchestrator
        .sync(Some(&[HistoryTable::Transactions]), ACCOUNT, false)
        .await
        .unwrap();
    let before = h
        .store
        .get_sync_cursor(HistoryTable::Transactions, ACCOUNT)
        .unwrap()
        .unwrap();

    // Remote now returns nothing at all.
    h.api.transactions.lock().unwrap().clear();
    h.orchestrator
        .sync(Some(&[HistoryTable::Transactions]), ACCOUNT, false)
        .await
        .unwrap();

    let after = h
        .store
        .get_sync_cursor(HistoryTable::Transactions, ACCOUNT)
        .unwrap()
        .unwrap();
    assert_eq!(after.last_cursor, before.last_cursor);
    assert!(after.last_sync_at >= before.last_sync_at);
    assert_eq!(after.record_count, 6);
}

#[tokio::test]
async fn test_force_resync_clears_before_refetch() {
    let h = harness(2);
    seed(&h.api);
    h.orchestrator
        .sync(Some(&[HistoryTable::Dividends]), ACCOUNT, false)
        .await
        .unwrap();
    let before = h
        .store
        .get_sync_cursor(HistoryTable::Dividends, ACCOUNT)
        .unwrap()
        .unwrap();

    // div-1 disappears remotely; only a cleared cache loses it.
    h.api.dividends.lock().unwrap().pop();

    let report = h
        .orchestrator
        .sync(Some(&[HistoryTable::Dividends]), ACCOUNT, true)
        .await
        .unwrap();
    let dividends = report.table(HistoryTable::Dividends).unwrap();
    assert_eq!(dividends.mode, SyncMode::Full);

    let cached = h
        .store
        .query(HistoryTable::Dividends, ACCOUNT, &HistoryFilter::default())
        .unwrap();
    assert_eq!(identities(&cached), vec!["div-4", "div-3", "div-2"]);

    let after = h
        .store
        .get_sync_cursor(HistoryTable::Dividends, ACCOUNT)
        .unwrap()
        .unwrap();
    assert!(after.last_sync_at >= before.last_sync_at);
    assert_eq!(after.record_count, 3);
}

#[tokio::test]
async fn test_partial_failure_keeps_pages_and_cursor() {
    let h = harness(2);
    seed(&h.api);
    // Third page of the first transactions sync fails.
    h.api
        .fail_on(HistoryTable::Transactions, 3, ApiError::ServerError { status: 503 });

    let err = h
        .orchestrator
        .sync(Some(&[HistoryTable::Transactions]), ACCOUNT, false)
        .await
        .unwrap_err();
    let failure = expect_incomplete(err);
    assert_eq!(failure.failed_tables(), vec![HistoryTable::Transactions]);
    assert_eq!(failure.failures[0].records_upserted, 4);
    assert!(matches!(
        failure.failures[0].error.api_error(),
        Some(ApiError::ServerError { status: 503 })
    ));

    // Two pages are durable, no cursor was written.
    let cached = h
        .store
        .query(HistoryTable::Transactions, ACCOUNT, &HistoryFilter::default())
        .unwrap();
    assert_eq!(identities(&cached), vec!["txn-6", "txn-5", "txn-4", "txn-3"]);
    assert!(h
        .store
        .get_sync_cursor(HistoryTable::Transactions, ACCOUNT)
        .unwrap()
        .is_none());

    // The next run starts over and completes.
    h.orchestrator
        .sync(Some(&[HistoryTable::Transactions]), ACCOUNT, false)
        .await
        .unwrap();
    assert_eq!(h.store.count(HistoryTable::Transactions, ACCOUNT).unwrap(), 6);
}

#[tokio::test]
async fn test_failed_incremental_sync_leaves_previous_cursor() {
    let h = harness(2);
    seed(&h.api);
    h.orchestrator
        .sync(Some(&[HistoryTable::Dividends]), ACCOUNT, false)
        .await
        .unwrap();
    let before = h
        .store
        .get_sync_cursor(HistoryTable::Dividends, ACCOUNT)
        .unwrap();

    h.api
        .dividends
        .lock()
        .unwrap()
        .insert(0, api_dividend("div-9", 9));
    let calls = h.api.calls_for(HistoryTable::Dividends).len();
    h.api.fail_on(
        HistoryTable::Dividends,
        calls + 1,
        ApiError::RequestTimeout {
            path: "/history/dividends".to_string(),
            status: Some(408),
        },
    );

    h.orchestrator
        .sync(Some(&[HistoryTable::Dividends]), ACCOUNT, false)
        .await
        .unwrap_err();
    assert_eq!(
        h.store
            .get_sync_cursor(HistoryTable::Dividends, ACCOUNT)
            .unwrap(),
        before
    );
}

#[tokio::test]
async fn test_table_failure_does_not_block_others() {
    let h = harness(3);
    seed(&h.api);
    h.api.fail_on(
        HistoryTable::Orders,
        1,
        ApiError::Authorization {
            path: "/equity/history/orders".to_string(),
        },
    );

    let err = h.orchestrator.sync(None, ACCOUNT, false).await.unwrap_err();
    let failure = expect_incomplete(err);

    assert_eq!(failure.failed_tables(), vec![HistoryTable::Orders]);
    let orders = failure.report.table(HistoryTable::Orders).unwrap();
    assert!(orders.error.is_some());
    assert!(failure
        .report
        .table(HistoryTable::Dividends)
        .unwrap()
        .succeeded());
    assert_eq!(h.store.count(HistoryTable::Dividends, ACCOUNT).unwrap(), 4);
    assert_eq!(h.store.count(HistoryTable::Transactions, ACCOUNT).unwrap(), 6);
    assert_eq!(h.store.count(HistoryTable::Orders, ACCOUNT).unwrap(), 0);
}

#[tokio::test]
async fn test_page_cap_stops_table_sync() {
    let h = harness(2);
    seed(&h.api);
    let orchestrator = SyncOrchestrator::new(
        h.api.clone(),
        h.store.clone(),
        SyncConfig {
            max_pages: 2,
            ..SyncConfig::default()
        },
    );

    let err = orchestrator
        .sync(Some(&[HistoryTable::Transactions]), ACCOUNT, false)
        .await
        .unwrap_err();
    let failure = expect_incomplete(err);
    assert!(matches!(
        failure.failures[0].error.api_error(),
        Some(ApiError::Pagination(_))
    ));
    assert_eq!(failure.failures[0].records_upserted, 4);
    let transactions = failure.report.table(HistoryTable::Transactions).unwrap();
    assert_eq!(transactions.pages_fetched, 2);
    assert_eq!(h.api.calls_for(HistoryTable::Transactions).len(), 2);
}

// ==================== Freshness ====================

#[tokio::test]
async fn test_ensure_fresh_syncs_only_when_stale() {
    let h = harness(10);
    seed(&h.api);

    let first = h
        .orchestrator
        .ensure_fresh(HistoryTable::Dividends, ACCOUNT)
        .await
        .unwrap();
    assert_eq!(first.unwrap().records_upserted, 4);

    let second = h
        .orchestrator
        .ensure_fresh(HistoryTable::Dividends, ACCOUNT)
        .await
        .unwrap();
    assert!(second.is_none());
    assert_eq!(h.api.calls_for(HistoryTable::Dividends).len(), 1);

    let forced = h
        .orchestrator
        .ensure_fresh_within(HistoryTable::Dividends, ACCOUNT, 0)
        .await
        .unwrap();
    assert!(forced.is_some());

    // Auto-sync off still fills a table that was never synced, then leaves it alone.
    let manual_only = h
        .orchestrator
        .ensure_fresh_within(HistoryTable::Transactions, ACCOUNT, -1)
        .await
        .unwrap();
    assert_eq!(manual_only.unwrap().records_upserted, 6);
    let again = h
        .orchestrator
        .ensure_fresh_within(HistoryTable::Transactions, ACCOUNT, -1)
        .await
        .unwrap();
    assert!(again.is_none());
    assert_eq!(h.api.calls_for(HistoryTable::Transactions).len(), 1);
}

// ==================== Service ====================

fn enabled_config() -> CacheConfig {
    CacheConfig {
        enabled: true,
        ..CacheConfig::default()
    }
}

#[tokio::test]
async fn test_service_query_refreshes_stale_table() {
    let h = harness(10);
    seed(&h.api);
    let service = HistoryService::new(h.orchestrator.clone(), h.store.clone(), enabled_config());

    let orders = service
        .query(
            HistoryTable::Orders,
            ACCOUNT,
            &HistoryFilter::default().limit(2),
            false,
        )
        .await
        .unwrap();
    assert_eq!(identities(&orders), vec!["5", "4"]);

    // Fresh now: a second read does not hit the API.
    service
        .query(HistoryTable::Orders, ACCOUNT, &HistoryFilter::default(), false)
        .await
        .unwrap();
    assert_eq!(h.api.calls_for(HistoryTable::Orders).len(), 1);

    // refresh forces a sync.
    service
        .query(HistoryTable::Orders, ACCOUNT, &HistoryFilter::default(), true)
        .await
        .unwrap();
    assert_eq!(h.api.calls_for(HistoryTable::Orders).len(), 2);
}

#[tokio::test]
async fn test_disabled_service() {
    let h = harness(2);
    seed(&h.api);
    let config = CacheConfig::default();
    let service = HistoryService::disabled(h.api.clone(), config.clone());

    assert!(!service.is_enabled());
    assert!(matches!(
        service.sync(None, ACCOUNT, false).await,
        Err(Error::CacheDisabled)
    ));
    assert!(matches!(
        service.ensure_fresh(HistoryTable::Orders, ACCOUNT).await,
        Err(Error::CacheDisabled)
    ));
    assert!(matches!(
        service.clear(None, None).await,
        Err(Error::CacheDisabled)
    ));

    let stats = service.stats(None, None).unwrap();
    assert!(!stats.enabled);
    assert_eq!(stats.database_path, config.database_path);
    assert!(stats.tables.is_empty());
}

#[tokio::test]
async fn test_disabled_service_queries_the_api() {
    let h = harness(2);
    seed(&h.api);
    let service = HistoryService::disabled(h.api.clone(), CacheConfig::default());

    let orders = service
        .query(
            HistoryTable::Orders,
            ACCOUNT,
            &HistoryFilter::default().limit(3),
            false,
        )
        .await
        .unwrap();
    assert_eq!(identities(&orders), vec!["5", "4", "3"]);
    // Every page was walked before the limit applied.
    assert_eq!(h.api.calls_for(HistoryTable::Orders).len(), 3);

    let since = DateTime::parse_from_rfc3339(&ts(4, 12))
        .unwrap()
        .with_timezone(&Utc);
    let transactions = service
        .query(
            HistoryTable::Transactions,
            ACCOUNT,
            &HistoryFilter::default().since(since),
            true,
        )
        .await
        .unwrap();
    assert_eq!(identities(&transactions), vec!["txn-6", "txn-5", "txn-4"]);
    let calls = h.api.calls_for(HistoryTable::Transactions);
    assert!(calls[0].time_from.is_some());

    // Nothing reaches the store.
    for table in HistoryTable::ALL {
        assert_eq!(h.store.count(table, ACCOUNT).unwrap(), 0);
    }
}
