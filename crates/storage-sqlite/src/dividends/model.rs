//! Database model for cached dividends.

use diesel::prelude::*;

use crate::errors::StorageError;
use crate::utils::{decimal_to_text, now_text, text_to_decimal, text_to_timestamp, timestamp_to_text};
use tradecache_core::history::DividendRecord;

#[derive(Queryable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::dividends)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(primary_key(reference, account_id))]
#[diesel(treat_none_as_null = true)]
pub struct DividendDB {
    pub reference: String,
    pub account_id: i64,
    pub ticker: Option<String>,
    pub amount: Option<String>,
    pub amount_in_euro: Option<String>,
    pub gross_amount_per_share: Option<String>,
    pub quantity: Option<String>,
    pub dividend_type: Option<String>,
    pub paid_on: Option<String>,
    pub raw_json: String,
    pub updated_at: String,
}

impl From<&DividendRecord> for DividendDB {
    fn from(record: &DividendRecord) -> Self {
        Self {
            reference: record.reference.clone(),
            account_id: record.account_id,
            ticker: record.ticker.clone(),
            amount: decimal_to_text(record.amount),
            amount_in_euro: decimal_to_text(record.amount_in_euro),
            gross_amount_per_share: decimal_to_text(record.gross_amount_per_share),
            quantity: decimal_to_text(record.quantity),
            dividend_type: record.dividend_type.clone(),
            paid_on: timestamp_to_text(record.paid_on),
            raw_json: record.raw.to_string(),
            updated_at: now_text(),
        }
    }
}

impl TryFrom<DividendDB> for DividendRecord {
    type Error = StorageError;

    fn try_from(db: DividendDB) -> Result<Self, Self::Error> {
        let raw = serde_json::from_str(&db.raw_json).map_err(|e| {
            StorageError::InvalidData(format!("dividend {} raw payload: {}", db.reference, e))
        })?;

        Ok(Self {
            reference: db.reference,
            account_id: db.account_id,
            ticker: db.ticker,
            amount: text_to_decimal(db.amount),
            amount_in_euro: text_to_decimal(db.amount_in_euro),
            gross_amount_per_share: text_to_decimal(db.gross_amount_per_share),
            quantity: text_to_decimal(db.quantity),
            dividend_type: db.dividend_type,
            paid_on: text_to_timestamp(db.paid_on),
            raw,
        })
    }
}
