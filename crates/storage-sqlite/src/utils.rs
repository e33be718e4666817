//! Column encoding helpers.
//!
//! Decimals are stored as TEXT to keep their exact scale. Record timestamps
//! are stored as fixed-width UTC RFC 3339 so text order equals time order.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::warn;
use rust_decimal::Decimal;
use tradecache_core::history::{format_record_timestamp, parse_record_timestamp};

pub fn decimal_to_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.normalize().to_string())
}

pub fn text_to_decimal(value: Option<String>) -> Option<Decimal> {
    let text = value?;
    match Decimal::from_str(&text) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!("Ignoring invalid stored decimal '{}': {}", text, e);
            None
        }
    }
}

pub fn timestamp_to_text(value: Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(format_record_timestamp)
}

pub fn text_to_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    let text = value?;
    let parsed = parse_record_timestamp(&text);
    if parsed.is_none() {
        warn!("Ignoring invalid stored timestamp '{}'", text);
    }
    parsed
}

/// Current UTC time in the stored timestamp format.
pub fn now_text() -> String {
    format_record_timestamp(&Utc::now())
}
