//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request / correlation ids, header hygiene)
//!     → dispatcher.rs (registry → breaker → downstream instance)
//!     → response.rs (uniform error body on failure)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::Dispatcher;
pub use request::{X_CORRELATION_ID, X_REQUEST_ID};
pub use response::{GatewayError, Unavailable};
pub use server::{AppState, HttpServer};
