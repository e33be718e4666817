//! Database model for cached orders.

use diesel::prelude::*;
use serde_json::Value;

use crate::errors::StorageError;
use crate::utils::{decimal_to_text, now_text, text_to_decimal, text_to_timestamp, timestamp_to_text};
use tradecache_core::history::OrderRecord;

#[derive(Queryable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(primary_key(id, account_id))]
#[diesel(treat_none_as_null = true)]
pub struct OrderDB {
    pub id: i64,
    pub account_id: i64,
    pub ticker: Option<String>,
    pub order_type: Option<String>,
    pub status: Option<String>,
    pub initiated_from: Option<String>,
    pub quantity: Option<String>,
    pub filled_quantity: Option<String>,
    pub limit_price: Option<String>,
    pub stop_price: Option<String>,
    pub fill_id: Option<i64>,
    pub fill_price: Option<String>,
    pub fill_type: Option<String>,
    pub net_value: Option<String>,
    pub realised_pnl: Option<String>,
    pub taxes_json: Option<String>,
    pub created_at: Option<String>,
    pub executed_at: Option<String>,
    pub raw_json: String,
    pub updated_at: String,
}

impl From<&OrderRecord> for OrderDB {
    fn from(record: &OrderRecord) -> Self {
        Self {
            id: record.id,
            account_id: record.account_id,
            ticker: record.ticker.clone(),
            order_type: record.order_type.clone(),
            status: record.status.clone(),
            initiated_from: record.initiated_from.clone(),
            quantity: decimal_to_text(record.quantity),
            filled_quantity: decimal_to_text(record.filled_quantity),
            limit_price: decimal_to_text(record.limit_price),
            stop_price: decimal_to_text(record.stop_price),
            fill_id: record.fill_id,
            fill_price: decimal_to_text(record.fill_price),
            fill_type: record.fill_type.clone(),
            net_value: decimal_to_text(record.net_value),
            realised_pnl: decimal_to_text(record.realised_pnl),
            taxes_json: record.taxes.as_ref().map(Value::to_string),
            created_at: timestamp_to_text(record.created_at),
            executed_at: timestamp_to_text(record.executed_at),
            raw_json: record.raw.to_string(),
            updated_at: now_text(),
        }
    }
}

impl TryFrom<OrderDB> for OrderRecord {
    type Error = StorageError;

    fn try_from(db: OrderDB) -> Result<Self, Self::Error> {
        let raw = serde_json::from_str(&db.raw_json).map_err(|e| {
            StorageError::InvalidData(format!("order {} raw payload: {}", db.id, e))
        })?;
        let taxes = db
            .taxes_json
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .map_err(|e| StorageError::InvalidData(format!("order {} taxes: {}", db.id, e)))?;

        Ok(Self {
            id: db.id,
            account_id: db.account_id,
            ticker: db.ticker,
            order_type: db.order_type,
            status: db.status,
            initiated_from: db.initiated_from,
            quantity: text_to_decimal(db.quantity),
            filled_quantity: text_to_decimal(db.filled_quantity),
            limit_price: text_to_decimal(db.limit_price),
            stop_price: text_to_decimal(db.stop_price),
            fill_id: db.fill_id,
            fill_price: text_to_decimal(db.fill_price),
            fill_type: db.fill_type,
            net_value: text_to_decimal(db.net_value),
            realised_pnl: text_to_decimal(db.realised_pnl),
            taxes,
            created_at: text_to_timestamp(db.created_at),
            executed_at: text_to_timestamp(db.executed_at),
            raw,
        })
    }
}
