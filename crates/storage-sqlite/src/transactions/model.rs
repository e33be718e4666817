//! Database model for cached cash transactions.

use diesel::prelude::*;

use crate::errors::StorageError;
use crate::utils::{decimal_to_text, now_text, text_to_decimal, text_to_timestamp, timestamp_to_text};
use tradecache_core::history::TransactionRecord;

#[derive(Queryable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(primary_key(reference, account_id))]
#[diesel(treat_none_as_null = true)]
pub struct TransactionDB {
    pub reference: String,
    pub account_id: i64,
    pub transaction_type: Option<String>,
    pub amount: Option<String>,
    pub date_time: Option<String>,
    pub raw_json: String,
    pub updated_at: String,
}

impl From<&TransactionRecord> for TransactionDB {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            reference: record.reference.clone(),
            account_id: record.account_id,
            transaction_type: record.transaction_type.clone(),
            amount: decimal_to_text(record.amount),
            date_time: timestamp_to_text(record.date_time),
            raw_json: record.raw.to_string(),
            updated_at: now_text(),
        }
    }
}

impl TryFrom<TransactionDB> for TransactionRecord {
    type Error = StorageError;

    fn try_from(db: TransactionDB) -> Result<Self, Self::Error> {
        let raw = serde_json::from_str(&db.raw_json).map_err(|e| {
            StorageError::InvalidData(format!("transaction {} raw payload: {}", db.reference, e))
        })?;

        Ok(Self {
            reference: db.reference,
            account_id: db.account_id,
            transaction_type: db.transaction_type,
            amount: text_to_decimal(db.amount),
            date_time: text_to_timestamp(db.date_time),
            raw,
        })
    }
}
