/// Classification for retry policy.
///
/// Used by the [`RetryExecutor`](crate::retry::RetryExecutor) to decide whether a
/// failed attempt is worth repeating and how long to wait first.
///
/// # Behavior Summary
///
/// | Class | Retry? | Wait before next attempt |
/// |-------|--------|--------------------------|
/// | `Never` | No | - |
/// | `WithBackoff` | Yes | exponential backoff with jitter |
/// | `AfterReset` | Yes | until the advertised rate-limit reset, backoff if unknown |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - bad credentials, missing permission, unknown resource,
    /// malformed request. Repeating the same request yields the same answer.
    Never,

    /// Transient failure (5xx, 408, dropped connection).
    /// Retry after an exponentially growing delay.
    WithBackoff,

    /// The server rejected the request because the rate-limit window is
    /// exhausted. Retry once the window resets.
    AfterReset,
}

impl RetryClass {
    /// Whether errors of this class should be retried at all.
    pub fn is_retryable(self) -> bool {
        !matches!(self, RetryClass::Never)
    }
}
