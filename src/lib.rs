//! Edge gateway library.
//!
//! Resilience and coordination for services behind one HTTP edge: circuit
//! breaking, a health-checked service registry, and an event bus client
//! with an offline retry queue and per-key workflow dedup.
//!
//! ```text
//!     Client Request
//!         → http (axum server) → dispatcher
//!             → registry (healthy instance, load balancer lease)
//!             → resilience (per-service circuit breaker, timeout)
//!             → downstream instance
//!
//!     health monitor → probes instances → registry health
//!
//!     event broker ⇄ event_bus client (publish, retry queue, subscriptions)
//!         → workflows (link analysis, moderation) → new events
//! ```

// Core subsystems
pub mod config;
pub mod http;

// Traffic management
pub mod health;
pub mod load_balancer;
pub mod registry;

// Coordination
pub mod event_bus;
pub mod workflows;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
