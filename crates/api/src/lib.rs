//! Resilient access to the brokerage history API.
//!
//! This crate owns everything that talks to the remote service:
//! - [`RateLimiter`]: per-endpoint gating driven by `x-ratelimit-*` headers
//! - [`RetryExecutor`]: classification-driven retries with exponential backoff
//! - [`ApiTransport`]: authenticated calls composing the two, plus status mapping
//! - [`HistoryApi`]: paginated history endpoints (orders, dividends, transactions)
//!
//! ```text
//! HistoryApiClient ──► ApiTransport ──► RetryExecutor ──► RateLimiter.acquire
//!                                              │                │
//!                                              ▼                ▼
//!                                          HttpSender ──► RateLimiter.observe
//! ```

pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod pagination;
pub mod rate_limiter;
pub mod retry;
pub mod transport;

pub use client::{HistoryApi, HistoryApiClient, MAX_ORDERS_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use config::{ClientConfig, Environment};
pub use errors::{ApiError, RetryClass};
pub use models::{AccountInfo, ApiDividend, ApiFill, ApiOrder, ApiOrderDetails, ApiTransaction};
pub use pagination::{drain_pages, Page, PageRequest, PageWalk};
pub use rate_limiter::{RateLimitState, RateLimiter};
pub use retry::{RetryExecutor, RetryPolicy};
pub use transport::{ApiRequest, ApiTransport, HttpSender, RawResponse, ReqwestSender};
