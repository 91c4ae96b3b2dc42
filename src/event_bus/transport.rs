//! Broker transport seam.
//!
//! The client speaks to the broker only through [`BrokerTransport`]:
//! `GET /health`, `POST /events` and `GET /events/stream?eventPattern=`.

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;

use crate::event_bus::envelope::Event;
use crate::event_bus::error::BusError;

/// One message read from a subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Synthetic notice sent by the broker when the stream opens.
    Connected,
    Event(Event),
}

/// Inbound messages; an `Err` item means the connection is lost.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamMessage, BusError>> + Send>>;

#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Broker liveness.
    async fn health(&self) -> Result<(), BusError>;

    /// Deliver one event, returning the broker-assigned id.
    async fn publish(&self, event: &Event) -> Result<String, BusError>;

    /// Open a server-push stream of events matching `pattern`.
    async fn open_stream(&self, pattern: &str) -> Result<EventStream, BusError>;
}
