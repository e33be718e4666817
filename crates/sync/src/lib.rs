//! Incremental sync of brokerage history into the local cache.
//!
//! [`SyncOrchestrator`] drives paginated fetches through
//! [`tradecache_api::HistoryApi`] into a
//! [`HistoricalStoreTrait`](tradecache_core::history::HistoricalStoreTrait).
//! [`HistoryService`] adds the cache-enabled gate and freshness-aware reads.

pub mod orchestrator;
pub mod service;

pub use orchestrator::{SyncConfig, SyncOrchestrator};
pub use service::HistoryService;
