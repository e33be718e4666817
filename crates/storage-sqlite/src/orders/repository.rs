//! Repository for cached orders.

use std::sync::Arc;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::warn;

use tradecache_core::errors::Result;
use tradecache_core::history::{
    format_record_timestamp, is_terminal_status, AccountId, HistoryFilter, OrderRecord,
};

use super::model::OrderDB;
use crate::db::{get_connection, DbPool};
use crate::errors::{IntoCore, StorageError};
use crate::schema::orders;

pub struct OrderRepository {
    pool: Arc<DbPool>,
}

impl OrderRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Orders of `account_id`, newest `created_at` first.
    ///
    /// Applies `ticker`, `status` and `since`; `kind` has no meaning for orders.
    pub fn query(&self, account_id: AccountId, filter: &HistoryFilter) -> Result<Vec<OrderRecord>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = orders::table
            .filter(orders::account_id.eq(account_id))
            .select(OrderDB::as_select())
            .order((orders::created_at.desc(), orders::id.desc()))
            .into_boxed();

        if let Some(ticker) = &filter.ticker {
            query = query.filter(orders::ticker.eq(ticker.clone()));
        }
        if let Some(status) = &filter.status {
            query = query.filter(orders::status.eq(status.to_ascii_uppercase()));
        }
        if let Some(since) = &filter.since {
            query = query.filter(orders::created_at.ge(format_record_timestamp(since)));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        let rows = query.load::<OrderDB>(&mut conn).map_err(StorageError::from)?;
        rows.into_iter()
            .map(|row| OrderRecord::try_from(row).map_err(Into::into))
            .collect()
    }

    pub fn count(&self, account_id: AccountId) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        orders::table
            .filter(orders::account_id.eq(account_id))
            .count()
            .get_result::<i64>(&mut conn)
            .into_core()
    }

    /// Insert or replace one order. Runs on the writer connection.
    ///
    /// Warns when an order already cached in a terminal status comes back with a
    /// different status; the new observation still wins.
    pub(crate) fn upsert_in(
        conn: &mut SqliteConnection,
        record: &OrderRecord,
    ) -> std::result::Result<(), StorageError> {
        let previous_status = orders::table
            .find((record.id, record.account_id))
            .select(orders::status)
            .first::<Option<String>>(conn)
            .optional()?
            .flatten();

        if let Some(previous) = previous_status.filter(|s| is_terminal_status(s)) {
            let changed = record
                .status
                .as_deref()
                .map_or(true, |status| !status.eq_ignore_ascii_case(&previous));
            if changed {
                warn!(
                    "Discrepancy detected for order {} (account {}): cached terminal status {} now reported as {:?}",
                    record.id, record.account_id, previous, record.status
                );
            }
        }

        let row = OrderDB::from(record);
        diesel::insert_into(orders::table)
            .values(&row)
            .on_conflict((orders::id, orders::account_id))
            .do_update()
            .set(&row)
            .execute(conn)?;
        Ok(())
    }

    /// Delete orders, for one account or all of them.
    pub(crate) fn delete_in(
        conn: &mut SqliteConnection,
        account_id: Option<AccountId>,
    ) -> std::result::Result<usize, StorageError> {
        let deleted = match account_id {
            Some(account_id) => {
                diesel::delete(orders::table.filter(orders::account_id.eq(account_id)))
                    .execute(conn)?
            }
            None => diesel::delete(orders::table).execute(conn)?,
        };
        Ok(deleted)
    }
}
