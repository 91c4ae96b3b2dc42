//! Status surfaces.
//!
//! # Data Flow
//! ```text
//! GET /admin/* + Authorization: Bearer <api_key>
//!     → auth.rs (reject without a valid token)
//!     → handlers.rs (snapshot breakers, registry, event bus, workflows)
//! ```
//!
//! Everything here is read-only; no route mutates gateway state.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use crate::http::server::AppState;
use self::auth::admin_auth_middleware;
use self::handlers::*;

pub fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/registry", get(get_registry))
        .route("/admin/event-bus", get(get_event_bus))
        .route("/admin/workflows", get(get_workflows))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
