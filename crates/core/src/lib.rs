//! Tradecache Core - history domain model, cache configuration, and the store contract.
//!
//! This crate is database-agnostic. It defines the records cached from the
//! brokerage API and the [`HistoricalStoreTrait`](history::HistoricalStoreTrait)
//! implemented by the `storage-sqlite` crate.

pub mod config;
pub mod errors;
pub mod history;

pub use config::CacheConfig;
pub use errors::{DatabaseError, Error, Result};
