//! Bounded external calls.

use std::future::Future;
use std::time::Duration;

use market_types::{MarketError, Result};

/// Run `call` with a deadline. An elapsed deadline becomes
/// [`MarketError::Timeout`], an external failure.
pub async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(MarketError::Timeout {
            operation: operation.to_string(),
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
