//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (health checks, event bus watchdog)
//! - Serve HTTP until shutdown, then stop everything in reverse
//!
//! # Design Decisions
//! - Fail fast on configuration and registry errors
//! - The event bus may start disconnected; `initialize()` is retried by the
//!   watchdog, which also restarts subscriptions that gave up

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, GatewayConfig};
use crate::event_bus::{BusError, EventBusClient, WorkflowTracker};
use crate::health::{HealthMonitor, HttpProbe};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::registry::{RegistryError, ServiceRegistry};
use crate::resilience::CircuitBreakers;
use crate::workflows::{workflow_router, RemoteAnalyzer};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every long-lived component, wired and ready to serve.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<ServiceRegistry>,
    bus: Option<EventBusClient>,
    workflows: Arc<WorkflowTracker>,
    shutdown: Shutdown,
}

impl Gateway {
    /// Build the component graph. Must run inside a Tokio runtime.
    pub fn build(config: GatewayConfig, shutdown: Shutdown) -> Result<Self, StartupError> {
        let breakers = Arc::new(CircuitBreakers::new(config.breaker.clone()));
        let registry = Arc::new(ServiceRegistry::from_config(&config, breakers)?);
        let workflows = Arc::new(WorkflowTracker::new());

        let bus = if config.event_bus.enabled {
            let bus = EventBusClient::from_config(&config.event_bus)?;
            let analyzer = Arc::new(RemoteAnalyzer::new(
                registry.clone(),
                config.workflows.analysis_service.clone(),
            ));
            let router = workflow_router(&config.workflows, &bus, &workflows, analyzer);
            let handler = Arc::new(router.clone());
            for event_type in router.event_types() {
                bus.subscribe(event_type, handler.clone());
            }
            Some(bus)
        } else {
            tracing::info!("Event bus disabled");
            None
        };

        Ok(Self {
            config,
            registry,
            bus,
            workflows,
            shutdown,
        })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> Option<&EventBusClient> {
        self.bus.as_ref()
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            &self.config,
            self.registry.clone(),
            self.bus.clone(),
            self.workflows.clone(),
        )
    }

    /// Start background tasks and serve on `listener` until shutdown.
    pub async fn run(self, listener: TcpListener) -> Result<(), StartupError> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let monitor = HealthMonitor::new(
            self.registry.clone(),
            Arc::new(HttpProbe::new()),
            self.config.health_check.clone(),
        );
        tasks.push(tokio::spawn(monitor.run(self.shutdown.subscribe())));

        if let Some(bus) = &self.bus {
            let interval = Duration::from_secs(self.config.event_bus.reinitialize_interval_secs.max(1));
            tasks.push(tokio::spawn(bus_watchdog(
                bus.clone(),
                interval,
                self.shutdown.subscribe(),
            )));
        }

        let server = HttpServer::new(&self.config, self.app_state());
        let served = server.run(listener, self.shutdown.wait()).await;

        self.shutdown.trigger();
        for task in tasks {
            let _ = task.await;
        }
        if let Some(bus) = &self.bus {
            bus.shutdown();
        }
        tracing::info!("Gateway stopped");
        served.map_err(StartupError::from)
    }
}

/// Initialize the bus now, then again whenever it is degraded.
async fn bus_watchdog(bus: EventBusClient, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
    if let Err(e) = bus.initialize().await {
        tracing::warn!(error = %e, "Event bus unavailable at startup; will retry");
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if bus.needs_initialize() {
                    if let Err(e) = bus.initialize().await {
                        tracing::debug!(error = %e, "Event bus re-initialization failed");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Event bus watchdog received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
