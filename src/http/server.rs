//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: gateway health, dispatch routes, status surfaces
//! - Wire up middleware (request id, tracing, timeout, body limit)
//! - Bind to the listener and serve until shutdown

use axum::{
    body::Body,
    extract::{Path, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::{AdminConfig, GatewayConfig};
use crate::event_bus::{EventBusClient, WorkflowTracker};
use crate::http::dispatcher::Dispatcher;
use crate::http::response::GatewayError;
use crate::registry::ServiceRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub registry: Arc<ServiceRegistry>,
    pub bus: Option<EventBusClient>,
    pub workflows: Arc<WorkflowTracker>,
    pub admin: AdminConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<ServiceRegistry>,
        bus: Option<EventBusClient>,
        workflows: Arc<WorkflowTracker>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(
                registry.clone(),
                config.retries.clone(),
                config.limits.max_body_bytes,
            ),
            registry,
            bus,
            workflows,
            admin: config.admin.clone(),
            started_at: Instant::now(),
        }
    }
}

/// HTTP front of the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/health", get(gateway_health))
            .route("/api/{service}", any(dispatch_root))
            .route("/api/{service}/{*path}", any(dispatch_path));

        if config.admin.enabled {
            router = router.merge(admin::admin_router(state.clone()));
        }

        router
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn gateway_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "services": state.registry.services().len(),
        "eventBusConnected": state.bus.as_ref().map(|bus| bus.is_connected()),
    }))
}

async fn dispatch_root(
    State(state): State<AppState>,
    Path(service): Path<String>,
    request: Request<Body>,
) -> Result<Response<Body>, GatewayError> {
    state.dispatcher.dispatch(&service, "/", request).await
}

async fn dispatch_path(
    State(state): State<AppState>,
    Path((service, path)): Path<(String, String)>,
    request: Request<Body>,
) -> Result<Response<Body>, GatewayError> {
    state
        .dispatcher
        .dispatch(&service, &format!("/{}", path), request)
        .await
}
