//! Header-driven rate limiter for API endpoints.
//!
//! The server reports its own view of the rate-limit window on every response
//! (`x-ratelimit-limit`, `x-ratelimit-remaining`, `x-ratelimit-reset`). This
//! limiter keeps the latest report per endpoint key and gates the next request
//! for that key against it. Local bookkeeping between responses is advisory;
//! the next response always overwrites it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use reqwest::header::HeaderMap;
use tokio::time::Instant;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Rate-limit window for a single endpoint key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Maximum requests per window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the window replenishes.
    pub reset_at: Instant,
}

/// One server report, as parsed from response headers.
pub type RateLimitObservation = RateLimitState;

impl RateLimitState {
    /// Parse the three rate-limit headers.
    ///
    /// Returns `None` when any header is absent (the endpoint is then left
    /// unconstrained) or when a value cannot be parsed or is out of range.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let limit = headers.get(HEADER_LIMIT)?;
        let remaining = headers.get(HEADER_REMAINING)?;
        let reset = headers.get(HEADER_RESET)?;

        let parsed = (|| {
            let limit = limit.to_str().ok()?.trim().parse::<u32>().ok()?;
            let remaining = remaining.to_str().ok()?.trim().parse::<u32>().ok()?;
            let reset_epoch = reset.to_str().ok()?.trim().parse::<f64>().ok()?;
            Some((limit, remaining, instant_from_epoch_secs(reset_epoch)?))
        })();

        match parsed {
            Some((limit, remaining, reset_at)) => Some(Self {
                limit,
                remaining,
                reset_at,
            }),
            None => {
                warn!(
                    "Failed to parse rate limit headers: limit={:?} remaining={:?} reset={:?}",
                    limit, remaining, reset
                );
                None
            }
        }
    }
}

/// Convert a unix timestamp (seconds) into a monotonic instant.
///
/// Timestamps in the past map to "now". Returns `None` for values that are
/// not finite or lie too far ahead to be represented.
pub fn instant_from_epoch_secs(epoch_secs: f64) -> Option<Instant> {
    if !epoch_secs.is_finite() {
        return None;
    }
    let now_secs = Utc::now().timestamp_millis() as f64 / 1000.0;
    let ahead = epoch_secs - now_secs;
    if ahead <= 0.0 {
        return Some(Instant::now());
    }
    let ahead = Duration::try_from_secs_f64(ahead).ok()?;
    Instant::now().checked_add(ahead)
}

/// Per-endpoint rate limiter fed by server response headers.
///
/// Thread-safe; one instance is created per process and shared by every
/// transport talking to the same credential.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the state map, recovering from poison if necessary.
    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, RateLimitState>> {
        self.states.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Record the server's latest view of the window for `key`.
    pub fn observe(&self, key: &str, observation: RateLimitObservation) {
        debug!(
            "Rate limiter: '{}' limit={} remaining={} reset_in={:?}",
            key,
            observation.limit,
            observation.remaining,
            observation
                .reset_at
                .saturating_duration_since(Instant::now())
        );
        self.lock_states().insert(key.to_string(), observation);
    }

    /// Parse response headers and record them if all three are present.
    ///
    /// Returns the parsed observation.
    pub fn observe_headers(&self, key: &str, headers: &HeaderMap) -> Option<RateLimitObservation> {
        let observation = RateLimitState::from_headers(headers)?;
        self.observe(key, observation);
        Some(observation)
    }

    /// Wait until a request for `key` may be issued, then consume one slot.
    ///
    /// Keys that were never observed pass straight through.
    pub async fn acquire(&self, key: &str) {
        loop {
            let wait_time = {
                let mut states = self.lock_states();
                let Some(state) = states.get_mut(key) else {
                    return;
                };

                if state.remaining > 0 {
                    state.remaining -= 1;
                    return;
                }

                let now = Instant::now();
                if now >= state.reset_at {
                    // Window has rolled over; assume the full limit is back.
                    state.remaining = state.limit.saturating_sub(1);
                    debug!("Rate limiter: window for '{}' replenished", key);
                    return;
                }

                state.reset_at - now
            };

            debug!("Rate limiter: waiting {:?} for '{}'", wait_time, key);
            tokio::time::sleep(wait_time).await;
        }
    }

    /// Snapshot of the current state for `key`.
    pub fn state(&self, key: &str) -> Option<RateLimitState> {
        self.lock_states().get(key).copied()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(limit: &str, remaining: &str, reset: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_LIMIT, HeaderValue::from_str(limit).unwrap());
        headers.insert(HEADER_REMAINING, HeaderValue::from_str(remaining).unwrap());
        headers.insert(HEADER_RESET, HeaderValue::from_str(reset).unwrap());
        headers
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_key_never_blocks() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire("/history/dividends").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.state("/history/dividends").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_capacity_returns_immediately() {
        let limiter = RateLimiter::new();
        limiter.observe(
            "/history/dividends",
            RateLimitState {
                limit: 6,
                remaining: 2,
                reset_at: Instant::now() + Duration::from_secs(60),
            },
        );

        let start = Instant::now();
        limiter.acquire("/history/dividends").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.state("/history/dividends").unwrap().remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_window_waits_until_reset() {
        let limiter = RateLimiter::new();
        let reset_at = Instant::now() + Duration::from_secs(5);
        limiter.observe(
            "/equity/history/orders",
            RateLimitState {
                limit: 6,
                remaining: 0,
                reset_at,
            },
        );

        limiter.acquire("/equity/history/orders").await;
        assert!(Instant::now() >= reset_at);

        let state = limiter.state("/equity/history/orders").unwrap();
        assert_eq!(state.remaining, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let limiter = RateLimiter::new();
        limiter.observe(
            "/equity/history/orders",
            RateLimitState {
                limit: 6,
                remaining: 0,
                reset_at: Instant::now() + Duration::from_secs(30),
            },
        );

        let start = Instant::now();
        limiter.acquire("/history/transactions").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_observation_overrides_local_state() {
        let limiter = RateLimiter::new();
        limiter.observe(
            "/history/dividends",
            RateLimitState {
                limit: 6,
                remaining: 0,
                reset_at: Instant::now() + Duration::from_secs(60),
            },
        );
        limiter.observe(
            "/history/dividends",
            RateLimitState {
                limit: 6,
                remaining: 3,
                reset_at: Instant::now() + Duration::from_secs(60),
            },
        );

        let start = Instant::now();
        limiter.acquire("/history/dividends").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_headers_parses_all_three() {
        let limiter = RateLimiter::new();
        let reset = (Utc::now().timestamp() + 10).to_string();
        let observation = limiter
            .observe_headers("/history/dividends", &headers("60", "59", &reset))
            .unwrap();
        assert_eq!(observation.limit, 60);
        assert_eq!(observation.remaining, 59);
        assert!(observation.reset_at > Instant::now());
    }

    #[test]
    fn test_missing_header_is_ignored() {
        let mut map = headers("60", "0", "1700000000");
        map.remove(HEADER_RESET);
        assert!(RateLimitState::from_headers(&map).is_none());
    }

    #[test]
    fn test_malformed_header_is_ignored() {
        let limiter = RateLimiter::new();
        let map = headers("sixty", "0", "1700000000");
        assert!(limiter.observe_headers("/history/dividends", &map).is_none());
        assert!(limiter.state("/history/dividends").is_none());
    }

    #[test]
    fn test_out_of_range_reset_is_ignored() {
        let limiter = RateLimiter::new();
        let map = headers("60", "0", "1e30");
        assert!(limiter.observe_headers("/history/dividends", &map).is_none());
        assert!(limiter.state("/history/dividends").is_none());

        assert!(instant_from_epoch_secs(f64::INFINITY).is_none());
        assert!(instant_from_epoch_secs(f64::NAN).is_none());
    }

    #[test]
    fn test_past_reset_maps_to_now() {
        let before = Instant::now();
        let instant = instant_from_epoch_secs(1_000.0).unwrap();
        assert!(instant >= before);
        assert!(instant <= Instant::now());
    }
}
