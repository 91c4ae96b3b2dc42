//! Exponential delays for dispatch retries and subscription reconnects.

use rand::Rng;
use std::time::Duration;

/// `base * 2^(attempt - 1)`, saturating. Attempt 0 means no delay.
fn exponential(attempt: u32, base: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    base.saturating_mul(2u32.saturating_pow(attempt - 1))
}

/// Dispatch retry delay: exponential, capped at `max`, plus up to 10% jitter.
pub fn jittered_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let capped = exponential(attempt, base).min(max);
    let jitter_ms = (capped.as_millis() / 10) as u64;
    if jitter_ms == 0 {
        return capped;
    }
    capped + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
}

/// Reconnect delay for a subscription. Deterministic and uncapped; the
/// subscription gives up after its retry budget instead.
pub fn reconnect_delay(retry_count: u32, base: Duration) -> Duration {
    exponential(retry_count.max(1), base)
}
