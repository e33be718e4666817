//! Repository for per-table, per-account sync cursors.

use std::sync::Arc;

use chrono::NaiveDateTime;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use tradecache_core::errors::Result;
use tradecache_core::history::{parse_sync_timestamp, AccountId, HistoryTable, SyncCursor};

use super::model::SyncCursorDB;
use crate::db::{get_connection, DbPool};
use crate::errors::StorageError;
use crate::schema::sync_cursors;

pub struct SyncCursorRepository {
    pool: Arc<DbPool>,
}

impl SyncCursorRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    pub fn get(&self, table: HistoryTable, account_id: AccountId) -> Result<Option<SyncCursor>> {
        let mut conn = get_connection(&self.pool)?;

        let row = sync_cursors::table
            .find((table.as_str(), account_id))
            .select(SyncCursorDB::as_select())
            .first::<SyncCursorDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        Ok(row.map(SyncCursor::try_from).transpose()?)
    }

    /// Most recent sync of `table`, for one account or across all of them.
    pub fn last_sync(
        &self,
        table: HistoryTable,
        account_id: Option<AccountId>,
    ) -> Result<Option<NaiveDateTime>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = sync_cursors::table
            .filter(sync_cursors::table_name.eq(table.as_str()))
            .select(max(sync_cursors::last_sync_at))
            .into_boxed();
        if let Some(account_id) = account_id {
            query = query.filter(sync_cursors::account_id.eq(account_id));
        }

        let latest = query
            .first::<Option<String>>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(latest.as_deref().and_then(parse_sync_timestamp))
    }

    pub(crate) fn upsert_in(
        conn: &mut SqliteConnection,
        cursor: &SyncCursor,
    ) -> std::result::Result<(), StorageError> {
        let row = SyncCursorDB::from(cursor);
        diesel::insert_into(sync_cursors::table)
            .values(&row)
            .on_conflict((sync_cursors::table_name, sync_cursors::account_id))
            .do_update()
            .set(&row)
            .execute(conn)?;
        Ok(())
    }

    pub(crate) fn delete_in(
        conn: &mut SqliteConnection,
        table: HistoryTable,
        account_id: Option<AccountId>,
    ) -> std::result::Result<usize, StorageError> {
        let scope = sync_cursors::table.filter(sync_cursors::table_name.eq(table.as_str()));
        let deleted = match account_id {
            Some(account_id) => {
                diesel::delete(scope.filter(sync_cursors::account_id.eq(account_id)))
                    .execute(conn)?
            }
            None => diesel::delete(scope).execute(conn)?,
        };
        Ok(deleted)
    }
}
