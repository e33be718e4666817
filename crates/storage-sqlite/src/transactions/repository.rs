//! Repository for cached cash transactions.

use std::sync::Arc;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use tradecache_core::errors::Result;
use tradecache_core::history::{
    format_record_timestamp, AccountId, HistoryFilter, TransactionRecord,
};

use super::model::TransactionDB;
use crate::db::{get_connection, DbPool};
use crate::errors::{IntoCore, StorageError};
use crate::schema::transactions;

pub struct TransactionRepository {
    pool: Arc<DbPool>,
}

impl TransactionRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Transactions of `account_id`, newest `date_time` first. `ticker` and
    /// `status` are ignored.
    pub fn query(
        &self,
        account_id: AccountId,
        filter: &HistoryFilter,
    ) -> Result<Vec<TransactionRecord>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = transactions::table
            .filter(transactions::account_id.eq(account_id))
            .select(TransactionDB::as_select())
            .order((transactions::date_time.desc(), transactions::reference.desc()))
            .into_boxed();

        if let Some(kind) = &filter.kind {
            query = query.filter(transactions::transaction_type.eq(kind.clone()));
        }
        if let Some(since) = &filter.since {
            query = query.filter(transactions::date_time.ge(format_record_timestamp(since)));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        let rows = query
            .load::<TransactionDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter()
            .map(|row| TransactionRecord::try_from(row).map_err(Into::into))
            .collect()
    }

    pub fn count(&self, account_id: AccountId) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        transactions::table
            .filter(transactions::account_id.eq(account_id))
            .count()
            .get_result::<i64>(&mut conn)
            .into_core()
    }

    pub(crate) fn upsert_in(
        conn: &mut SqliteConnection,
        record: &TransactionRecord,
    ) -> std::result::Result<(), StorageError> {
        let row = TransactionDB::from(record);
        diesel::insert_into(transactions::table)
            .values(&row)
            .on_conflict((transactions::reference, transactions::account_id))
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
            Some(account_id) => diesel::delete(
                transactions::table.filter(transactions::account_id.eq(account_id)),
            )
            .execute(conn)?,
            None => diesel::delete(transactions::table).execute(conn)?,
        };
        Ok(deleted)
    }
}
