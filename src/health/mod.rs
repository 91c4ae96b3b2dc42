//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer (default 30s)
//!     → Breaker-guarded probe per instance (probe.rs, 5s deadline)
//!     → 200 → healthy, anything else → unhealthy
//!     → Update instance state + service probe statistics (registry)
//! ```
//!
//! # Design Decisions
//! - One probe failure marks an instance unhealthy; one success restores it
//! - Health state is per-instance; service status is derived per round
//! - Probes go through a trait so tests and alternative transports plug in

pub mod active;
pub mod probe;

pub use active::HealthMonitor;
pub use probe::{HealthProbe, HttpProbe};
