//! Event bus client subsystem.
//!
//! # Data Flow
//! ```text
//! publish():
//!     → envelope.rs (stamp source, timestamp, correlation id)
//!     → client.rs (deadline; on BrokerUnreachable queue for resend)
//!     → transport.rs → http_broker.rs | memory.rs
//!
//! subscribe():
//!     → subscription.rs (supervised stream → bounded queue)
//!     → handlers.rs (EventRouter picks the handler by event type)
//!     → on handler error: <namespace>.event.error published by client.rs
//!
//! Workflows:
//!     → workflow.rs (at most one in-flight run per workflow key)
//! ```
//!
//! # Design Decisions
//! - The broker is reached only through the `BrokerTransport` trait
//! - Queued events are resent in order by `initialize()`, never dropped
//! - Handler failures are isolated per event and reported, not fatal

pub mod client;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod http_broker;
pub mod memory;
mod subscription;
pub mod transport;
pub mod workflow;

pub use client::{BusStatus, EventBusClient, SubscriptionStatus};
pub use envelope::{pattern_matches, Event, EventMetadata, PublishOptions};
pub use error::{BusError, HandlerError};
pub use handlers::{handler_fn, EventHandler, EventRouter, Routed};
pub use http_broker::HttpBroker;
pub use memory::InMemoryBroker;
pub use transport::{BrokerTransport, EventStream, StreamMessage};
pub use workflow::{
    WorkflowAlreadyInFlight, WorkflowEntry, WorkflowGuard, WorkflowStatus, WorkflowTracker,
};
