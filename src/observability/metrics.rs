//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (breaker events, health, dispatch, events)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_breaker_events_total` (counter): breaker outcomes and transitions by service, event
//! - `gateway_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_call_duration_seconds` (histogram): guarded call latency by service
//! - `gateway_instance_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_requests_total` (counter): dispatched requests by service, status
//! - `gateway_request_duration_seconds` (histogram): inbound request latency
//! - `gateway_events_published_total` (counter): publishes by outcome
//! - `gateway_event_retry_queue_depth` (gauge): events awaiting resend
//! - `gateway_events_handled_total` (counter): inbound events by type, outcome
//! - `gateway_workflows_in_flight` (gauge): keyed tasks currently running
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op, so tests need no setup
//! - Labels for service, event and status; instance index rather than URL

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_breaker_event(service: &str, event: &'static str) {
    ::metrics::counter!(
        "gateway_breaker_events_total",
        "service" => service.to_string(),
        "event" => event
    )
    .increment(1);
}

pub fn record_breaker_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    ::metrics::gauge!("gateway_breaker_state", "service" => service.to_string()).set(value);
}

pub fn record_call_duration(service: &str, latency: Duration) {
    ::metrics::histogram!("gateway_call_duration_seconds", "service" => service.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_instance_health(service: &str, instance: usize, healthy: bool) {
    ::metrics::gauge!(
        "gateway_instance_health",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_request(service: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("gateway_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_publish(outcome: &'static str) {
    ::metrics::counter!("gateway_events_published_total", "outcome" => outcome).increment(1);
}

pub fn record_retry_queue_depth(depth: usize) {
    ::metrics::gauge!("gateway_event_retry_queue_depth").set(depth as f64);
}

pub fn record_event_handled(event_type: &str, outcome: &'static str) {
    ::metrics::counter!(
        "gateway_events_handled_total",
        "event_type" => event_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_workflows_in_flight(count: usize) {
    ::metrics::gauge!("gateway_workflows_in_flight").set(count as f64);
}
