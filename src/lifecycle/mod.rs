//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → breakers → registry → event bus + workflows
//!     → background tasks (health monitor, bus watchdog) → HTTP listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop background tasks → drain HTTP → stop subscriptions
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - A broker outage at startup is not fatal; the watchdog keeps retrying

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Gateway, StartupError};
