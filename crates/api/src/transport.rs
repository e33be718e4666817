//! Authenticated HTTP transport with rate-limit gating and retries.
//!
//! Every logical call goes through
//! `RetryExecutor::execute(|| { acquire(key); send; observe(key, headers); map status })`,
//! so limiter state is refreshed from every response, error responses included.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::errors::ApiError;
use crate::rate_limiter::{RateLimitState, RateLimiter};
use crate::retry::RetryExecutor;

/// Default timeout for a single HTTP request.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// A single request, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Key used to scope rate-limit state: the path without any query string.
    pub fn endpoint_key(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }
}

/// Status, headers and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// Sends one HTTP request. Implemented over `reqwest` in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ApiError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// reqwest sender
// ─────────────────────────────────────────────────────────────────────────────

/// [`HttpSender`] backed by a `reqwest::Client` with Basic authentication.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderValue,
}

impl ReqwestSender {
    /// Create a sender for `base_url` authenticating as `api_key:api_secret`.
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Result<Self, ApiError> {
        let credentials = BASE64.encode(format!("{}:{}", api_key, api_secret));
        let auth_header = HeaderValue::from_str(&format!("Basic {}", credentials))
            .map_err(|e| ApiError::Config(format!("Invalid API credentials format: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to initialize HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create default headers for API requests.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, self.auth_header.clone());
        headers
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("[HistoryApi] {} {}", request.method, url);

        let response = self
            .client
            .request(request.method.clone(), &url)
            .headers(self.headers())
            .query(&request.query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::RequestTimeout {
                        path: request.path.clone(),
                        status: None,
                    }
                } else {
                    ApiError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("Failed to read response: {}", e)))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    clarification: Option<String>,
}

/// Map a non-success response to the typed failure taxonomy.
pub fn classify_status(request: &ApiRequest, response: &RawResponse) -> ApiError {
    let path = request.path.clone();
    match response.status.as_u16() {
        400 => {
            let parsed = serde_json::from_str::<ApiErrorBody>(&response.body).ok();
            ApiError::Validation {
                status: 400,
                code: parsed.as_ref().and_then(|b| b.code.clone()),
                clarification: parsed.and_then(|b| b.clarification),
            }
        }
        401 => ApiError::Authentication,
        403 => ApiError::Authorization { path },
        404 => ApiError::NotFound { path },
        408 => ApiError::RequestTimeout {
            path,
            status: Some(408),
        },
        429 => ApiError::RateLimited {
            path,
            retry_at: RateLimitState::from_headers(&response.headers).map(|s| s.reset_at),
        },
        status if status >= 500 => ApiError::ServerError { status },
        status => ApiError::UnexpectedStatus {
            status,
            body: response.body.chars().take(200).collect(),
        },
    }
}

/// Rate-limited, retrying JSON transport.
#[derive(Clone)]
pub struct ApiTransport {
    sender: Arc<dyn HttpSender>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
}

impl ApiTransport {
    pub fn new(sender: Arc<dyn HttpSender>, limiter: Arc<RateLimiter>, retry: RetryExecutor) -> Self {
        Self {
            sender,
            limiter,
            retry,
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Perform `request` and decode the JSON body as `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.execute(&request).await?;
        serde_json::from_str(&response.body).map_err(|e| {
            ApiError::Decode(format!(
                "{} {}: {} - {}",
                request.method,
                request.path,
                e,
                response.body.chars().take(200).collect::<String>()
            ))
        })
    }

    /// Perform `request` with gating and retries, returning the successful response.
    pub async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        self.retry.execute(|| self.attempt(request)).await
    }

    /// One gated attempt.
    async fn attempt(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let key = request.endpoint_key();
        self.limiter.acquire(key).await;

        let response = self.sender.send(request).await?;
        self.limiter.observe_headers(key, &response.headers);

        if response.status.is_success() {
            return Ok(response);
        }

        warn!(
            "HTTP error {} on {} {}",
            response.status.as_u16(),
            request.method,
            request.path
        );
        Err(classify_status(request, &response))
    }
}
