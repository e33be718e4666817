//! SQLite storage for the brokerage history cache.
//!
//! This crate is the only place where Diesel appears. It implements
//! [`HistoricalStoreTrait`](tradecache_core::history::HistoricalStoreTrait)
//! on top of:
//! - an r2d2 pool for reads
//! - a single writer task that runs every write in an immediate transaction
//! - embedded Diesel migrations
//!
//! ```text
//! sync (orchestrator)
//!        │
//!        ▼
//! core::HistoricalStoreTrait
//!        │
//!        ▼
//! storage-sqlite (this crate) ──► SQLite DB
//! ```

pub mod cursors;
pub mod db;
pub mod dividends;
pub mod errors;
pub mod orders;
pub mod schema;
pub mod store;
pub mod transactions;
pub mod utils;

pub use db::{create_pool, get_connection, init, run_migrations, DbConnection, DbPool, WriteHandle};
pub use errors::{IntoCore, StorageError};
pub use store::{SqliteHistoryStore, SYNC_CURSORS_TABLE};

pub use tradecache_core::errors::{DatabaseError, Error, Result};
