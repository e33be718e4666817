//! Repository for cached dividends.

use std::sync::Arc;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use tradecache_core::errors::Result;
use tradecache_core::history::{format_record_timestamp, AccountId, DividendRecord, HistoryFilter};

use super::model::DividendDB;
use crate::db::{get_connection, DbPool};
use crate::errors::{IntoCore, StorageError};
use crate::schema::dividends;

pub struct DividendRepository {
    pool: Arc<DbPool>,
}

impl DividendRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Dividends of `account_id`, newest `paid_on` first.
    pub fn query(
        &self,
        account_id: AccountId,
        filter: &HistoryFilter,
    ) -> Result<Vec<DividendRecord>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = dividends::table
            .filter(dividends::account_id.eq(account_id))
            .select(DividendDB::as_select())
            .order((dividends::paid_on.desc(), dividends::reference.desc()))
            .into_boxed();

        if let Some(ticker) = &filter.ticker {
            query = query.filter(dividends::ticker.eq(ticker.clone()));
        }
        if let Some(kind) = &filter.kind {
            query = query.filter(dividends::dividend_type.eq(kind.clone()));
        }
        if let Some(since) = &filter.since {
            query = query.filter(dividends::paid_on.ge(format_record_timestamp(since)));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        let rows = query
            .load::<DividendDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter()
            .map(|row| DividendRecord::try_from(row).map_err(Into::into))
            .collect()
    }

    pub fn count(&self, account_id: AccountId) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        dividends::table
            .filter(dividends::account_id.eq(account_id))
            .count()
            .get_result::<i64>(&mut conn)
            .into_core()
    }

    pub(crate) fn upsert_in(
        conn: &mut SqliteConnection,
        record: &DividendRecord,
    ) -> std::result::Result<(), StorageError> {
        let row = DividendDB::from(record);
        diesel::insert_into(dividends::table)
            .values(&row)
            .on_conflict((dividends::reference, dividends::account_id))
            .do_update()
            .set(&row)
            .execute(conn)?;
        Ok(())
    }

    pub(crate) fn delete_in(
        conn: &mut SqliteConnection,
        account_id: Option<AccountId>,
    ) -> std::result::Result<usize, StorageError> {
        let deleted = match account_id {
            Some(account_id) => {
                diesel::delete(dividends::table.filter(dividends::account_id.eq(account_id)))
                    .execute(conn)?
            }
            None => diesel::delete(dividends::table).execute(conn)?,
        };
        Ok(deleted)
    }
}
