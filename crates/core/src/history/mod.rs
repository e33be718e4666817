//! History module - cached records, sync cursors, and the store contract.

mod freshness;
mod history_model;
mod history_traits;
mod sync_model;
mod timestamps;

pub use freshness::{is_fresh, ALWAYS_SYNC, NEVER_AUTO_SYNC};
pub use history_model::{
    is_terminal_status, AccountId, CacheStats, ClearSummary, DividendRecord, HistoryFilter,
    HistoryRecord, HistoryTable, OrderRecord, SyncCursor, TableStats, TransactionRecord,
    UpsertSummary, TERMINAL_ORDER_STATUSES,
};
pub use history_traits::HistoricalStoreTrait;
pub use sync_model::{SyncFailure, SyncMode, SyncReport, TableSyncFailure, TableSyncResult};
pub use timestamps::{
    format_record_timestamp, format_sync_timestamp, local_now, parse_record_timestamp,
    parse_sync_timestamp,
};
