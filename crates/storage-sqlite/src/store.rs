//! SQLite implementation of [`HistoricalStoreTrait`].

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable};
use diesel::sqlite::SqliteConnection;
use log::{debug, info, warn};

use tradecache_core::errors::Result;
use tradecache_core::history::{
    AccountId, CacheStats, ClearSummary, HistoricalStoreTrait, HistoryFilter, HistoryRecord,
    HistoryTable, SyncCursor, TableStats, UpsertSummary,
};

use crate::cursors::SyncCursorRepository;
use crate::db::{self, get_connection, spawn_writer, DbPool, WriteHandle};
use crate::dividends::DividendRepository;
use crate::errors::StorageError;
use crate::orders::OrderRepository;
use crate::transactions::TransactionRepository;

/// Key used in [`ClearSummary`] for deleted cursor rows.
pub const SYNC_CURSORS_TABLE: &str = "sync_cursors";

#[derive(QueryableByName)]
struct TableSizeRow {
    #[diesel(sql_type = BigInt)]
    record_count: i64,
    #[diesel(sql_type = BigInt)]
    approx_bytes: i64,
}

pub struct SqliteHistoryStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    db_path: String,
    orders: OrderRepository,
    dividends: DividendRepository,
    transactions: TransactionRepository,
    cursors: SyncCursorRepository,
}

impl SqliteHistoryStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle, db_path: impl Into<String>) -> Self {
        Self {
            orders: OrderRepository::new(Arc::clone(&pool)),
            dividends: DividendRepository::new(Arc::clone(&pool)),
            transactions: TransactionRepository::new(Arc::clone(&pool)),
            cursors: SyncCursorRepository::new(Arc::clone(&pool)),
            pool,
            writer,
            db_path: db_path.into(),
        }
    }

    /// Open (or create) the cache at `db_path`, run migrations and start the writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(db_path: &str) -> Result<Self> {
        let db_path = db::init(db_path)?;
        let pool = db::create_pool(&db_path)?;
        db::run_migrations(&pool)?;
        let writer = spawn_writer((*pool).clone())?;
        info!("History cache opened at {}", db_path);
        Ok(Self::new(pool, writer, db_path))
    }

    pub fn database_path(&self) -> &str {
        &self.db_path
    }

    fn table_size(&self, table: HistoryTable, account_id: Option<AccountId>) -> Result<TableSizeRow> {
        let mut conn = get_connection(&self.pool)?;
        let sql = format!(
            "SELECT COUNT(*) AS record_count, COALESCE(SUM(LENGTH(raw_json)), 0) AS approx_bytes \
             FROM {} WHERE (? IS NULL OR account_id = ?)",
            table.as_str()
        );
        Ok(diesel::sql_query(sql)
            .bind::<Nullable<BigInt>, _>(account_id)
            .bind::<Nullable<BigInt>, _>(account_id)
            .get_result::<TableSizeRow>(&mut conn)
            .map_err(StorageError::from)?)
    }
}

fn upsert_one(
    conn: &mut SqliteConnection,
    record: &HistoryRecord,
) -> std::result::Result<(), StorageError> {
    match record {
        HistoryRecord::Order(order) => OrderRepository::upsert_in(conn, order),
        HistoryRecord::Dividend(dividend) => DividendRepository::upsert_in(conn, dividend),
        HistoryRecord::Transaction(txn) => TransactionRepository::upsert_in(conn, txn),
    }
}

fn delete_records(
    conn: &mut SqliteConnection,
    table: HistoryTable,
    account_id: Option<AccountId>,
) -> std::result::Result<usize, StorageError> {
    match table {
        HistoryTable::Orders => OrderRepository::delete_in(conn, account_id),
        HistoryTable::Dividends => DividendRepository::delete_in(conn, account_id),
        HistoryTable::Transactions => TransactionRepository::delete_in(conn, account_id),
    }
}

fn scope(table: Option<HistoryTable>) -> Vec<HistoryTable> {
    table.map_or_else(|| HistoryTable::ALL.to_vec(), |t| vec![t])
}

#[async_trait]
impl HistoricalStoreTrait for SqliteHistoryStore {
    async fn upsert_records(&self, records: Vec<HistoryRecord>) -> Result<UpsertSummary> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let summary = self
            .writer
            .exec(move |conn| {
                let mut summary = UpsertSummary::default();
                for record in &records {
                    // Savepoint per record: one bad row must not undo the batch.
                    match conn.transaction::<_, StorageError, _>(|c| upsert_one(c, record)) {
                        Ok(()) => summary.upserted += 1,
                        Err(e) => {
                            warn!(
                                "Skipping {} record {} for account {}: {}",
                                record.table(),
                                record.identity(),
                                record.account_id(),
                                e
                            );
                            summary.skipped += 1;
                        }
                    }
                }
                Ok(summary)
            })
            .await?;

        debug!(
            "Upserted {} records ({} skipped)",
            summary.upserted, summary.skipped
        );
        Ok(summary)
    }

    fn query(
        &self,
        table: HistoryTable,
        account_id: AccountId,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryRecord>> {
        Ok(match table {
            HistoryTable::Orders => self
                .orders
                .query(account_id, filter)?
                .into_iter()
                .map(HistoryRecord::from)
                .collect(),
            HistoryTable::Dividends => self
                .dividends
                .query(account_id, filter)?
                .into_iter()
                .map(HistoryRecord::from)
                .collect(),
            HistoryTable::Transactions => self
                .transactions
                .query(account_id, filter)?
                .into_iter()
                .map(HistoryRecord::from)
                .collect(),
        })
    }

    fn get_sync_cursor(
        &self,
        table: HistoryTable,
        account_id: AccountId,
    ) -> Result<Option<SyncCursor>> {
        self.cursors.get(table, account_id)
    }

    async fn set_sync_cursor(&self, cursor: SyncCursor) -> Result<()> {
        self.writer
            .exec(move |conn| Ok(SyncCursorRepository::upsert_in(conn, &cursor)?))
            .await
    }

    async fn clear(
        &self,
        table: Option<HistoryTable>,
        account_id: Option<AccountId>,
    ) -> Result<ClearSummary> {
        let tables = scope(table);
        let summary = self
            .writer
            .exec(move |conn| {
                let mut summary = ClearSummary::default();
                let mut cursors = 0;
                for table in tables {
                    let deleted = delete_records(conn, table, account_id)?;
                    summary.deleted.insert(table.as_str().to_string(), deleted);
                    cursors += SyncCursorRepository::delete_in(conn, table, account_id)?;
                }
                summary
                    .deleted
                    .insert(SYNC_CURSORS_TABLE.to_string(), cursors);
                Ok(summary)
            })
            .await?;

        info!(
            "Cleared {} cached rows (table: {}, account: {})",
            summary.total(),
            table.map_or("all".to_string(), |t| t.to_string()),
            account_id.map_or("all".to_string(), |a| a.to_string())
        );
        Ok(summary)
    }

    fn count(&self, table: HistoryTable, account_id: AccountId) -> Result<i64> {
        match table {
            HistoryTable::Orders => self.orders.count(account_id),
            HistoryTable::Dividends => self.dividends.count(account_id),
            HistoryTable::Transactions => self.transactions.count(account_id),
        }
    }

    fn stats(
        &self,
        table: Option<HistoryTable>,
        account_id: Option<AccountId>,
    ) -> Result<CacheStats> {
        let mut tables = Vec::new();
        for table in scope(table) {
            let size = self.table_size(table, account_id)?;
            tables.push(TableStats {
                table,
                record_count: size.record_count,
                approx_bytes: size.approx_bytes,
                last_sync: self.cursors.last_sync(table, account_id)?,
            });
        }

        // Recent writes may still sit in the WAL file.
        let database_size_bytes = [self.db_path.clone(), format!("{}-wal", self.db_path)]
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|m| m.len())
            .sum();

        Ok(CacheStats {
            enabled: true,
            database_path: self.db_path.clone(),
            database_size_bytes,
            tables,
        })
    }
}
