//! Bounded retry for paginated feed queries and single node reads.
//!
//! Every page query is preceded by `page_delay`. A failed query is followed by
//! `error_delay` and retried, at most `max_retries` times per page. Running
//! out of retries is not an error for feeds: the caller gets whatever was
//! gathered, flagged incomplete.

use permission_core::RuntimeConfig;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub page_delay: Duration,
    pub error_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_secs(1),
            error_delay: Duration::from_secs(5),
            max_retries: 20,
        }
    }
}

impl RetryPolicy {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            page_delay: runtime.page_delay(),
            error_delay: runtime.error_delay(),
            max_retries: runtime.max_retries,
        }
    }

    /// No waiting at all; for in-memory feeds.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            page_delay: Duration::ZERO,
            error_delay: Duration::ZERO,
            max_retries,
        }
    }
}

/// Result of a retried feed read. `complete == false` means retries ran out
/// and `value` holds only what was read before that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedOutcome<T> {
    pub value: T,
    pub complete: bool,
}

impl<T> FeedOutcome<T> {
    pub fn complete(value: T) -> Self {
        Self {
            value,
            complete: true,
        }
    }

    pub fn incomplete(value: T) -> Self {
        Self {
            value,
            complete: false,
        }
    }
}

/// Run `op` until it succeeds, fails with an error `retryable` rejects, or
/// `policy.max_retries` retries have gone by. The last error is returned.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    retryable: fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut failures = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) && failures < policy.max_retries => {
                failures += 1;
                warn!(what, attempt = failures, error = %e, "read failed; pausing");
                tokio::time::sleep(policy.error_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
