//! Downstream call failures and their classification.
//!
//! Only connection errors, timeouts, 5xx and 429 count against a circuit.
//! Any other 4xx is the caller's fault and leaves the circuit alone.

use std::time::Duration;
use thiserror::Error;

/// Why a guarded downstream call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownstreamError {
    /// Connection refused, reset, DNS failure and similar.
    #[error("network error: {0}")]
    Network(String),

    /// The call did not finish within its deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The downstream answered with a non-success status.
    #[error("downstream responded with status {0}")]
    Status(u16),
}

/// How a failure is treated by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, timeout, 5xx and 429. Counted against the circuit.
    Transient,
    /// Other 4xx. Propagated but never counted.
    Permanent,
}

impl DownstreamError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DownstreamError::Network(_) | DownstreamError::Timeout(_) => FailureKind::Transient,
            DownstreamError::Status(status) if *status == 429 || *status >= 500 => {
                FailureKind::Transient
            }
            DownstreamError::Status(_) => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}
