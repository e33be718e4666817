//! History service: the operations exposed to callers.

use std::sync::Arc;

use log::debug;

use tradecache_api::HistoryApi;
use tradecache_core::config::CacheConfig;
use tradecache_core::errors::{Error, Result};
use tradecache_core::history::{
    AccountId, CacheStats, ClearSummary, DividendRecord, HistoricalStoreTrait, HistoryFilter,
    HistoryRecord, HistoryTable, OrderRecord, SyncReport, TableSyncResult, TransactionRecord,
    ALWAYS_SYNC,
};

use crate::orchestrator::SyncOrchestrator;

struct Backend {
    orchestrator: Arc<SyncOrchestrator>,
    store: Arc<dyn HistoricalStoreTrait>,
}

/// Entry point for cache reads and syncs.
///
/// When the cache is turned off, [`query`](Self::query) reads straight from the
/// API, [`stats`](Self::stats) reports a disabled cache, and every other
/// operation fails with [`Error::CacheDisabled`].
pub struct HistoryService {
    api: Arc<dyn HistoryApi>,
    backend: Option<Backend>,
    config: CacheConfig,
}

impl HistoryService {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        store: Arc<dyn HistoricalStoreTrait>,
        config: CacheConfig,
    ) -> Self {
        Self {
            api: Arc::clone(orchestrator.api()),
            backend: Some(Backend {
                orchestrator,
                store,
            }),
            config,
        }
    }

    /// A service with no backing store, for when the cache is turned off.
    pub fn disabled(api: Arc<dyn HistoryApi>, config: CacheConfig) -> Self {
        Self {
            api,
            backend: None,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.backend.is_some()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn backend(&self) -> Result<&Backend> {
        match &self.backend {
            Some(backend) if self.config.enabled => Ok(backend),
            _ => Err(Error::CacheDisabled),
        }
    }

    pub async fn ensure_fresh(
        &self,
        table: HistoryTable,
        account_id: AccountId,
    ) -> Result<Option<TableSyncResult>> {
        self.backend()?
            .orchestrator
            .ensure_fresh_within(table, account_id, self.config.freshness_minutes)
            .await
    }

    pub async fn sync(
        &self,
        tables: Option<&[HistoryTable]>,
        account_id: AccountId,
        force: bool,
    ) -> Result<SyncReport> {
        self.backend()?
            .orchestrator
            .sync(tables, account_id, force)
            .await
    }

    /// Read cached records, syncing first when the table is stale.
    ///
    /// `refresh` syncs regardless of freshness. Without a cache the whole
    /// table is fetched from the API and filtered in memory.
    pub async fn query(
        &self,
        table: HistoryTable,
        account_id: AccountId,
        filter: &HistoryFilter,
        refresh: bool,
    ) -> Result<Vec<HistoryRecord>> {
        let Ok(backend) = self.backend() else {
            return self.query_live(table, account_id, filter).await;
        };
        let threshold = if refresh {
            ALWAYS_SYNC
        } else {
            self.config.freshness_minutes
        };
        if let Some(result) = backend
            .orchestrator
            .ensure_fresh_within(table, account_id, threshold)
            .await?
        {
            debug!(
                "Refreshed {} before query: {} records upserted",
                table, result.records_upserted
            );
        }
        backend.store.query(table, account_id, filter)
    }

    async fn query_live(
        &self,
        table: HistoryTable,
        account_id: AccountId,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryRecord>> {
        debug!(
            "Cache disabled, reading {} for account {} from the API",
            table, account_id
        );
        let records: Vec<HistoryRecord> = match table {
            HistoryTable::Orders => self
                .api
                .all_orders()
                .await?
                .into_iter()
                .filter_map(|o| OrderRecord::from_api(account_id, o))
                .map(Into::into)
                .collect(),
            HistoryTable::Dividends => self
                .api
                .all_dividends(filter.ticker.clone())
                .await?
                .into_iter()
                .filter_map(|d| DividendRecord::from_api(account_id, d))
                .map(Into::into)
                .collect(),
            HistoryTable::Transactions => self
                .api
                .all_transactions(filter.since)
                .await?
                .into_iter()
                .filter_map(|t| TransactionRecord::from_api(account_id, t))
                .map(Into::into)
                .collect(),
        };
        Ok(filter.apply(records))
    }

    pub async fn clear(
        &self,
        table: Option<HistoryTable>,
        account_id: Option<AccountId>,
    ) -> Result<ClearSummary> {
        self.backend()?.store.clear(table, account_id).await
    }

    pub fn stats(
        &self,
        table: Option<HistoryTable>,
        account_id: Option<AccountId>,
    ) -> Result<CacheStats> {
        match self.backend() {
            Ok(backend) => backend.store.stats(table, account_id),
            Err(_) => Ok(CacheStats::disabled(self.config.database_path.clone())),
        }
    }
}
