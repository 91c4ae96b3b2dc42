//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap downstream calls, probes and publishes with a deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timeout is a transient failure like any network error
//! - No cooperative cancellation: the timed-out future is dropped and any
//!   late downstream result is discarded

use std::future::Future;
use std::time::Duration;
use tokio::time;

use crate::resilience::error::DownstreamError;

/// Run `fut` with a deadline, mapping expiry to [`DownstreamError::Timeout`].
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, DownstreamError>
where
    Fut: Future<Output = Result<T, DownstreamError>>,
{
    match time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DownstreamError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_error() {
        let limit = Duration::from_millis(20);
        let result: Result<(), _> = with_timeout(limit, async {
            time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(DownstreamError::Timeout(limit)));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, DownstreamError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
