//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded call to a downstream:
//!     → breakers.rs (look up the per-service breaker)
//!     → circuit_breaker.rs (admit, reject or probe)
//!     → timeouts.rs (enforce the call deadline)
//!     → error.rs (classify the outcome: transient or permanent)
//!     → rolling.rs (record into the rolling window, maybe trip)
//!
//! Caller-side policy:
//!     → retries.rs + backoff.rs (gateway retries for idempotent requests,
//!       subscription reconnect delays)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit breaker prevents cascading failures
//! - Breaker state is explicit and testable, not delegated to a library

pub mod backoff;
pub mod breakers;
pub mod circuit_breaker;
pub mod error;
pub mod retries;
pub mod rolling;
pub mod timeouts;

pub use breakers::CircuitBreakers;
pub use circuit_breaker::{
    BreakerError, BreakerMetrics, BreakerSnapshot, CircuitBreaker, CircuitState, Guarded,
};
pub use error::{DownstreamError, FailureKind};
