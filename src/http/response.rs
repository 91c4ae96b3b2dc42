//! Uniform gateway error responses.
//!
//! # Design Decisions
//! - Every downstream failure surfaces as the same 503 body naming the
//!   logical service; instance URLs and error chains stay in the logs
//! - The body carries a stable machine-readable code

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::resilience::BreakerError;

/// Why a service was reported unavailable. Logged, never rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    NoHealthyInstance,
    CircuitOpen,
    DownstreamFailure,
}

impl Unavailable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unavailable::NoHealthyInstance => "no_healthy_instance",
            Unavailable::CircuitOpen => "circuit_open",
            Unavailable::DownstreamFailure => "downstream_failure",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("service '{service}' unavailable ({})", .reason.as_str())]
    ServiceUnavailable { service: String, reason: Unavailable },

    #[error("unknown service '{service}'")]
    UnknownService { service: String },

    #[error("request body too large")]
    PayloadTooLarge,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UnknownService { .. } => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            GatewayError::UnknownService { .. } => "UNKNOWN_SERVICE",
            GatewayError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
        }
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownService { service } => GatewayError::UnknownService { service },
            RegistryError::NoHealthyInstance { service } => GatewayError::ServiceUnavailable {
                service,
                reason: Unavailable::NoHealthyInstance,
            },
            RegistryError::InvalidInstance { service, .. } => GatewayError::ServiceUnavailable {
                service,
                reason: Unavailable::DownstreamFailure,
            },
        }
    }
}

impl From<BreakerError> for GatewayError {
    fn from(err: BreakerError) -> Self {
        let reason = if err.is_circuit_open() {
            Unavailable::CircuitOpen
        } else {
            Unavailable::DownstreamFailure
        };
        GatewayError::ServiceUnavailable {
            service: err.service().to_string(),
            reason,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = match &self {
            GatewayError::ServiceUnavailable { service, .. } => json!({
                "error": {
                    "code": self.code(),
                    "service": service,
                    "message": format!("Service '{}' is temporarily unavailable", service),
                }
            }),
            GatewayError::UnknownService { service } => json!({
                "error": {
                    "code": self.code(),
                    "service": service,
                    "message": format!("No service named '{}'", service),
                }
            }),
            GatewayError::PayloadTooLarge => json!({
                "error": {
                    "code": self.code(),
                    "message": "Request body too large",
                }
            }),
        };
        (self.status(), Json(body)).into_response()
    }
}
