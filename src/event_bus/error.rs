//! Event bus errors.

use thiserror::Error;

/// Failures talking to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Transport failure or timeout; the broker is presumed down.
    #[error("event broker unreachable: {0}")]
    BrokerUnreachable(String),

    /// The broker answered but refused the event.
    #[error("broker rejected event '{event_type}' with status {status}")]
    PublishRejected { event_type: String, status: u16 },

    /// The push stream could not be opened or broke.
    #[error("subscription '{pattern}' failed: {reason}")]
    Subscription { pattern: String, reason: String },

    #[error("invalid broker url '{0}'")]
    InvalidBrokerUrl(String),
}

/// Failure raised by an event handler; isolated per event.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid '{event_type}' payload: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl HandlerError {
    pub fn invalid_payload(event_type: &str, err: impl std::fmt::Display) -> Self {
        HandlerError::InvalidPayload {
            event_type: event_type.to_string(),
            reason: err.to_string(),
        }
    }
}
