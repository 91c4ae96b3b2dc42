//! Gateway dispatcher.
//!
//! # Responsibilities
//! - Resolve the logical service to a healthy instance (registry)
//! - Forward the request through that service's circuit breaker
//! - Retry idempotent requests on transient failures
//! - Translate every unrecovered failure into a `GatewayError`
//!
//! # Data Flow
//! ```text
//! /api/{service}/{*path}
//!     → registry.get_healthy_instance(service) → InstanceLease
//!     → breakers.execute(service, forward) → response | BreakerError
//!     → on transient failure: backoff, pick again (GET/HEAD/OPTIONS only)
//!     → 503 SERVICE_UNAVAILABLE {service} once attempts are exhausted
//! ```
//!
//! # Design Decisions
//! - Downstream 5xx and 429 count as failures and never reach the client
//! - Other downstream responses, 4xx included, are passed through
//! - Breaker and registry never retry; only this caller does

use axum::body::Body;
use axum::http::{Method, Request, Response, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::sync::Arc;
use std::time::Instant;

use crate::config::RetryConfig;
use crate::http::request::{correlation_id, forward_headers, request_id, strip_hop_by_hop};
use crate::http::response::{GatewayError, Unavailable};
use crate::observability::metrics;
use crate::registry::ServiceRegistry;
use crate::resilience::retries::{is_retryable, retry_delay};
use crate::resilience::DownstreamError;

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    client: Client<HttpConnector, Body>,
    retries: RetryConfig,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceRegistry>, retries: RetryConfig, max_body_bytes: usize) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            registry,
            client,
            retries,
            max_body_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Forward `request` to `path` on a healthy instance of `service`.
    pub async fn dispatch(
        &self,
        service: &str,
        path: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>, GatewayError> {
        let start = Instant::now();
        let result = self.dispatch_inner(service, path, request).await;
        let status = match &result {
            Ok(response) => response.status().as_u16(),
            Err(e) => e.status().as_u16(),
        };
        metrics::record_request(service, status, start);
        result
    }

    async fn dispatch_inner(
        &self,
        service: &str,
        path: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>, GatewayError> {
        let downstream = self
            .registry
            .service(service)
            .ok_or_else(|| GatewayError::UnknownService {
                service: service.to_string(),
            })?;

        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| GatewayError::PayloadTooLarge)?;

        let request_id = request_id(&parts.headers);
        let correlation_id = correlation_id(&parts.headers);
        let headers = forward_headers(&parts.headers, &request_id, &correlation_id);
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        };

        let max_attempts = if is_idempotent(&parts.method) {
            1 + downstream.retries
        } else {
            1
        };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let lease = self.registry.get_healthy_instance(service).map_err(|e| {
                tracing::warn!(
                    service = %service,
                    request_id = %request_id,
                    error = %e,
                    "No instance to dispatch to"
                );
                GatewayError::from(e)
            })?;

            let target: Uri = lease
                .url
                .join(&path_and_query)
                .ok()
                .and_then(|url| url.as_str().parse().ok())
                .ok_or_else(|| GatewayError::ServiceUnavailable {
                    service: service.to_string(),
                    reason: Unavailable::DownstreamFailure,
                })?;

            let mut builder = Request::builder()
                .method(parts.method.clone())
                .uri(target);
            if let Some(h) = builder.headers_mut() {
                *h = headers.clone();
            }
            let outbound = builder
                .body(Body::from(body.clone()))
                .map_err(|_| GatewayError::PayloadTooLarge)?;

            let outcome = self
                .registry
                .breakers()
                .execute(service, || forward(&self.client, outbound))
                .await;

            match outcome {
                Ok(guarded) => {
                    tracing::debug!(
                        service = %service,
                        request_id = %request_id,
                        attempt,
                        status = guarded.value.status().as_u16(),
                        "Dispatched request"
                    );
                    return Ok(guarded.into_inner());
                }
                Err(e) if attempt < max_attempts && is_retryable(&parts.method, &e) => {
                    let delay = retry_delay(&self.retries, attempt);
                    tracing::info!(
                        service = %service,
                        request_id = %request_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying request"
                    );
                    drop(lease);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        service = %service,
                        request_id = %request_id,
                        correlation_id = %correlation_id,
                        attempt,
                        error = %e,
                        "Dispatch failed"
                    );
                    return Err(e.into());
                }
            }
        }
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// One downstream hop. 5xx and 429 become errors so the breaker counts them.
async fn forward(
    client: &Client<HttpConnector, Body>,
    request: Request<Body>,
) -> Result<Response<Body>, DownstreamError> {
    let response = client
        .request(request)
        .await
        .map_err(|e| DownstreamError::Network(e.to_string()))?;

    let status = response.status();
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(DownstreamError::Status(status.as_u16()));
    }

    let (mut parts, body) = response.into_parts();
    parts.headers = strip_hop_by_hop(&parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}
