//! Read-only status handlers.

use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::event_bus::{BusStatus, WorkflowEntry};
use crate::http::server::AppState;
use crate::registry::{ServiceSnapshot, ServiceStatus};
use crate::resilience::{BreakerSnapshot, CircuitState};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub services: usize,
    pub healthy_services: usize,
    pub open_circuits: Vec<String>,
    pub event_bus_connected: Option<bool>,
    pub retry_queue_length: usize,
    pub workflows_in_flight: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReport {
    #[serde(flatten)]
    pub snapshot: ServiceSnapshot,
    pub dependencies_healthy: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let services = state.registry.services();
    let healthy_services = services
        .iter()
        .filter(|service| service.status() == ServiceStatus::Healthy)
        .count();
    let open_circuits = state
        .registry
        .breakers()
        .snapshot()
        .into_iter()
        .filter(|(_, snapshot)| snapshot.state == CircuitState::Open)
        .map(|(name, _)| name)
        .collect();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        services: services.len(),
        healthy_services,
        open_circuits,
        event_bus_connected: state.bus.as_ref().map(|bus| bus.is_connected()),
        retry_queue_length: state.bus.as_ref().map_or(0, |bus| bus.retry_queue_len()),
        workflows_in_flight: state.workflows.len(),
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<BTreeMap<String, BreakerSnapshot>> {
    Json(state.registry.breakers().snapshot())
}

pub async fn get_registry(State(state): State<AppState>) -> Json<BTreeMap<String, ServiceReport>> {
    let report = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(name, snapshot)| {
            let dependencies_healthy = state.registry.are_dependencies_healthy(&name);
            (
                name,
                ServiceReport {
                    snapshot,
                    dependencies_healthy,
                },
            )
        })
        .collect();
    Json(report)
}

pub async fn get_event_bus(State(state): State<AppState>) -> Json<Option<BusStatus>> {
    Json(state.bus.as_ref().map(|bus| bus.status()))
}

pub async fn get_workflows(State(state): State<AppState>) -> Json<Vec<WorkflowEntry>> {
    Json(state.workflows.entries())
}
