//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every instance of every registered service
//! - Update instance health and per-service probe statistics
//!
//! # Design Decisions
//! - Each probe runs through its own per-instance breaker with a short
//!   deadline; a timeout or rejection marks the instance unhealthy
//! - Probe failures are logged, never raised

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::probe::HealthProbe;
use crate::load_balancer::Instance;
use crate::observability::metrics;
use crate::registry::{DownstreamService, ServiceRegistry, ServiceStatus};
use crate::resilience::timeouts::with_timeout;

pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn HealthProbe>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            config,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout = self.config.timeout_secs,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every service concurrently.
    pub async fn check_all(&self) {
        let services = self.registry.services();
        join_all(services.iter().map(|service| self.check_service(service))).await;
    }

    /// Probe every instance of one service and close the round.
    pub async fn check_service(&self, service: &DownstreamService) -> ServiceStatus {
        let probes = service
            .instances
            .iter()
            .enumerate()
            .map(|(index, instance)| self.check_instance(service, index, instance));
        join_all(probes).await;
        service.finish_health_check()
    }

    async fn check_instance(
        &self,
        service: &DownstreamService,
        index: usize,
        instance: &Arc<Instance>,
    ) -> bool {
        let key = service.health_breaker_key(index);
        let timeout = self.config.timeout();
        let started = Instant::now();

        let result = self
            .registry
            .breakers()
            .execute(&key, || {
                with_timeout(
                    timeout,
                    self.probe.probe(&instance.url, &service.health_check_path),
                )
            })
            .await;
        let latency = started.elapsed();

        let healthy = match result {
            Ok(_) => {
                instance.mark_healthy();
                true
            }
            Err(e) => {
                let failures = instance.mark_unhealthy();
                tracing::warn!(
                    service = %service.name,
                    instance = index,
                    consecutive_failures = failures,
                    error = %e,
                    "Health check failed"
                );
                false
            }
        };

        service.record_probe(healthy, latency);
        metrics::record_instance_health(&service.name, index, healthy);
        healthy
    }
}
