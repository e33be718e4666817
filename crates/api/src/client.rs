//! Client for the brokerage history endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;

use crate::config::ClientConfig;
use crate::errors::ApiError;
use crate::models::{AccountInfo, ApiDividend, ApiOrder, ApiTransaction};
use crate::pagination::{drain_pages, Page, PageRequest};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryExecutor;
use crate::transport::{ApiRequest, ApiTransport, ReqwestSender};

pub const ACCOUNT_INFO_PATH: &str = "/equity/account/info";
pub const ORDERS_PATH: &str = "/equity/history/orders";
pub const DIVIDENDS_PATH: &str = "/history/dividends";
pub const TRANSACTIONS_PATH: &str = "/history/transactions";

/// The orders endpoint answers 500 for page sizes above 8.
pub const MAX_ORDERS_PAGE_LIMIT: u32 = 8;

/// Page size ceiling for dividends and transactions.
pub const MAX_PAGE_LIMIT: u32 = 50;

/// Safety limit for the `all_*` helpers.
const MAX_PAGES: usize = 10_000;

/// Trait for fetching history pages from the remote API.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// Fetch account metadata, including the account id.
    async fn account_info(&self) -> Result<AccountInfo, ApiError>;

    /// Fetch one page of historical orders, newest first.
    async fn orders_page(&self, request: &PageRequest) -> Result<Page<ApiOrder>, ApiError>;

    /// Fetch one page of dividends, newest first.
    async fn dividends_page(&self, request: &PageRequest) -> Result<Page<ApiDividend>, ApiError>;

    /// Fetch one page of cash transactions, newest first.
    async fn transactions_page(
        &self,
        request: &PageRequest,
    ) -> Result<Page<ApiTransaction>, ApiError>;

    /// Fetch every historical order.
    async fn all_orders(&self) -> Result<Vec<ApiOrder>, ApiError> {
        drain_pages(PageRequest::first(MAX_ORDERS_PAGE_LIMIT), MAX_PAGES, |r| async move {
            self.orders_page(&r).await
        })
        .await
    }

    /// Fetch every dividend, optionally for a single ticker.
    async fn all_dividends(&self, ticker: Option<String>) -> Result<Vec<ApiDividend>, ApiError> {
        let first = PageRequest::first(MAX_PAGE_LIMIT).with_ticker(ticker);
        drain_pages(first, MAX_PAGES, |r| async move { self.dividends_page(&r).await }).await
    }

    /// Fetch every transaction, optionally only those at or after `time_from`.
    async fn all_transactions(
        &self,
        time_from: Option<DateTime<Utc>>,
    ) -> Result<Vec<ApiTransaction>, ApiError> {
        let first = PageRequest::first(MAX_PAGE_LIMIT).with_time_from(time_from);
        drain_pages(first, MAX_PAGES, |r| async move {
            self.transactions_page(&r).await
        })
        .await
    }
}

/// [`HistoryApi`] over an [`ApiTransport`].
///
/// # Example
///
/// ```ignore
/// let client = HistoryApiClient::from_config(&ClientConfig::from_env()?, limiter)?;
/// let dividends = client.all_dividends(None).await?;
/// ```
#[derive(Clone)]
pub struct HistoryApiClient {
    transport: ApiTransport,
}

impl HistoryApiClient {
    pub fn new(transport: ApiTransport) -> Self {
        Self { transport }
    }

    /// Build a client with a `reqwest` sender and the default retry policy.
    ///
    /// `limiter` should be shared by every client using the same credentials.
    pub fn from_config(config: &ClientConfig, limiter: Arc<RateLimiter>) -> Result<Self, ApiError> {
        let sender = ReqwestSender::new(&config.base_url(), &config.api_key, &config.api_secret)?;
        info!(
            "History API client configured for {} ({})",
            config.environment,
            sender.base_url()
        );
        Ok(Self::new(ApiTransport::new(
            Arc::new(sender),
            limiter,
            RetryExecutor::default(),
        )))
    }

    pub fn transport(&self) -> &ApiTransport {
        &self.transport
    }

    async fn page<T>(&self, path: &str, query: Vec<(String, String)>) -> Result<Page<T>, ApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.transport
            .get_json(ApiRequest::get(path).with_query(query))
            .await
    }
}

fn page_query(request: &PageRequest, max_limit: u32) -> Vec<(String, String)> {
    let mut query = vec![(
        "limit".to_string(),
        request.limit.clamp(1, max_limit).to_string(),
    )];
    if let Some(cursor) = &request.cursor {
        query.push(("cursor".to_string(), cursor.clone()));
    }
    query
}

#[async_trait]
impl HistoryApi for HistoryApiClient {
    async fn account_info(&self) -> Result<AccountInfo, ApiError> {
        self.transport.get_json(ApiRequest::get(ACCOUNT_INFO_PATH)).await
    }

    async fn orders_page(&self, request: &PageRequest) -> Result<Page<ApiOrder>, ApiError> {
        let mut query = page_query(request, MAX_ORDERS_PAGE_LIMIT);
        if let Some(ticker) = &request.ticker {
            query.push(("ticker".to_string(), ticker.clone()));
        }
        self.page(ORDERS_PATH, query).await
    }

    async fn dividends_page(&self, request: &PageRequest) -> Result<Page<ApiDividend>, ApiError> {
        let mut query = page_query(request, MAX_PAGE_LIMIT);
        if let Some(ticker) = &request.ticker {
            query.push(("ticker".to_string(), ticker.clone()));
        }
        self.page(DIVIDENDS_PATH, query).await
    }

    async fn transactions_page(
        &self,
        request: &PageRequest,
    ) -> Result<Page<ApiTransaction>, ApiError> {
        let mut query = page_query(request, MAX_PAGE_LIMIT);
        if let Some(time_from) = &request.time_from {
            query.push(("time".to_string(), time_from.clone()));
        }
        self.page(TRANSACTIONS_PATH, query).await
    }
}
