//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a failed dispatch is retryable
//! - Compute the delay before the next attempt
//!
//! # Design Decisions
//! - Only the gateway dispatcher retries; breaker and registry never do
//! - Never retry POST/PUT/DELETE/PATCH (non-idempotent)
//! - Never retry a circuit-open rejection (that would defeat the breaker)
//! - Jittered backoff prevents thundering herd

use axum::http::Method;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::jittered_backoff;
use crate::resilience::circuit_breaker::BreakerError;

/// Whether another attempt may follow `error` for a request with `method`.
pub fn is_retryable(method: &Method, error: &BreakerError) -> bool {
    let idempotent = matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS);
    idempotent && error.downstream().is_some_and(|e| e.is_transient())
}

/// Delay before attempt number `attempt + 1`.
pub fn retry_delay(config: &RetryConfig, attempt: u32) -> Duration {
    jittered_backoff(
        attempt,
        Duration::from_millis(config.base_delay_ms),
        Duration::from_millis(config.max_delay_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::error::DownstreamError;

    fn downstream(source: DownstreamError) -> BreakerError {
        BreakerError::Downstream {
            service: "content".into(),
            source,
        }
    }

    #[test]
    fn test_only_idempotent_transient_failures_retry() {
        let transient = downstream(DownstreamError::Status(503));
        assert!(is_retryable(&Method::GET, &transient));
        assert!(is_retryable(&Method::HEAD, &transient));
        assert!(!is_retryable(&Method::POST, &transient));

        let client_error = downstream(DownstreamError::Status(404));
        assert!(!is_retryable(&Method::GET, &client_error));

        let open = BreakerError::CircuitOpen {
            service: "content".into(),
        };
        assert!(!is_retryable(&Method::GET, &open));
    }

    #[test]
    fn test_retry_delay_grows() {
        let config = RetryConfig {
            base_delay_ms: 10,
            max_delay_ms: 1000,
        };
        assert!(retry_delay(&config, 1) >= Duration::from_millis(10));
        assert!(retry_delay(&config, 3) >= Duration::from_millis(40));
    }
}
