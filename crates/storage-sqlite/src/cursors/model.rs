//! Database model for sync cursors.

use diesel::prelude::*;

use crate::errors::StorageError;
use crate::utils::{now_text, text_to_timestamp, timestamp_to_text};
use tradecache_core::history::{
    format_sync_timestamp, parse_sync_timestamp, HistoryTable, SyncCursor,
};

#[derive(Queryable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::sync_cursors)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(primary_key(table_name, account_id))]
#[diesel(treat_none_as_null = true)]
pub struct SyncCursorDB {
    pub table_name: String,
    pub account_id: i64,
    /// Local naive time.
    pub last_sync_at: String,
    pub last_cursor: Option<String>,
    pub record_count: i64,
    pub updated_at: String,
}

impl From<&SyncCursor> for SyncCursorDB {
    fn from(cursor: &SyncCursor) -> Self {
        Self {
            table_name: cursor.table.as_str().to_string(),
            account_id: cursor.account_id,
            last_sync_at: format_sync_timestamp(&cursor.last_sync_at),
            last_cursor: timestamp_to_text(cursor.last_cursor),
            record_count: cursor.record_count,
            updated_at: now_text(),
        }
    }
}

impl TryFrom<SyncCursorDB> for SyncCursor {
    type Error = StorageError;

    fn try_from(db: SyncCursorDB) -> Result<Self, Self::Error> {
        let table = db
            .table_name
            .parse::<HistoryTable>()
            .map_err(|_| StorageError::InvalidData(format!("unknown table '{}'", db.table_name)))?;
        let last_sync_at = parse_sync_timestamp(&db.last_sync_at).ok_or_else(|| {
            StorageError::InvalidData(format!(
                "sync cursor for {} has invalid last_sync_at '{}'",
                db.table_name, db.last_sync_at
            ))
        })?;

        Ok(Self {
            table,
            account_id: db.account_id,
            last_sync_at,
            last_cursor: text_to_timestamp(db.last_cursor),
            record_count: db.record_count,
        })
    }
}
