//! Service registry.
//!
//! # Responsibilities
//! - Own the downstream services and their instances (from configuration)
//! - Select a healthy instance per request
//! - Expose per-service health for status surfaces and dependency checks
//!
//! # Data Flow
//! ```text
//! Dispatcher → get_healthy_instance(name)
//!     → filter instances to healthy
//!     → load balancer picks one → InstanceLease
//!
//! HealthMonitor (health/active.rs) → breaker-guarded probe per instance
//!     → Instance::mark_healthy / mark_unhealthy
//!     → DownstreamService::record_probe / finish_health_check
//! ```
//!
//! # Design Decisions
//! - The registry never returns an unhealthy instance; with none left it
//!   raises NoHealthyInstance
//! - Health failures never escape: the registry degrades to fewer instances
//! - Dependency health is advisory and never enforced

pub mod service;

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{CircuitBreakerConfig, GatewayConfig, ServiceConfig};
use crate::load_balancer::{InstanceLease, Strategy};
use crate::resilience::CircuitBreakers;

pub use service::{DownstreamService, ServiceSnapshot, ServiceStatus};

/// Errors raised by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service '{service}' is not registered")]
    UnknownService { service: String },

    #[error("no healthy instance available for service '{service}'")]
    NoHealthyInstance { service: String },

    #[error("service '{service}' has invalid instance url '{url}': {source}")]
    InvalidInstance {
        service: String,
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Owned table of downstream services.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<DownstreamService>>,
    breakers: Arc<CircuitBreakers>,
    strategy: Strategy,
}

impl ServiceRegistry {
    pub fn new(breakers: Arc<CircuitBreakers>, strategy: Strategy) -> Self {
        Self {
            services: DashMap::new(),
            breakers,
            strategy,
        }
    }

    /// Build a registry holding every service declared in `config`.
    pub fn from_config(
        config: &GatewayConfig,
        breakers: Arc<CircuitBreakers>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new(breakers, config.registry.strategy);
        for service in &config.services {
            registry.register_service(service)?;
        }
        Ok(registry)
    }

    /// Register (or replace) a service and configure its breaker with the
    /// service's own call timeout.
    pub fn register_service(
        &self,
        config: &ServiceConfig,
    ) -> Result<Arc<DownstreamService>, RegistryError> {
        let service = Arc::new(DownstreamService::from_config(config, self.strategy)?);
        self.breakers.configure(
            &config.name,
            CircuitBreakerConfig {
                timeout_ms: config.timeout_ms,
                ..self.breakers.defaults().clone()
            },
        );
        self.services.insert(config.name.clone(), service.clone());
        tracing::info!(
            service = %config.name,
            instances = service.instances.len(),
            priority = config.priority,
            "Service registered"
        );
        Ok(service)
    }

    pub fn service(&self, name: &str) -> Option<Arc<DownstreamService>> {
        self.services.get(name).map(|s| s.clone())
    }

    /// All services, highest priority first.
    pub fn services(&self) -> Vec<Arc<DownstreamService>> {
        let mut all: Vec<_> = self.services.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        all
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Lease a healthy instance of `name`.
    pub fn get_healthy_instance(&self, name: &str) -> Result<InstanceLease, RegistryError> {
        let service = self
            .service(name)
            .ok_or_else(|| RegistryError::UnknownService {
                service: name.to_string(),
            })?;
        service.select().ok_or_else(|| {
            tracing::debug!(service = %name, instances = service.instances.len(), "No healthy instances");
            RegistryError::NoHealthyInstance {
                service: name.to_string(),
            }
        })
    }

    /// True only if every declared dependency is registered and healthy.
    pub fn are_dependencies_healthy(&self, name: &str) -> bool {
        let Some(service) = self.service(name) else {
            return false;
        };
        service.dependencies.iter().all(|dependency| {
            self.service(dependency)
                .map(|d| d.status() == ServiceStatus::Healthy)
                .unwrap_or(false)
        })
    }

    pub fn snapshot(&self) -> BTreeMap<String, ServiceSnapshot> {
        self.services
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry(strategy: Strategy) -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(CircuitBreakers::default()), strategy)
    }

    fn auth_config() -> ServiceConfig {
        ServiceConfig::new(
            "auth",
            vec!["http://10.0.0.1:4001".into(), "http://10.0.0.2:4001".into()],
        )
    }

    #[test]
    fn test_only_healthy_instances_returned() {
        let registry = registry(Strategy::RoundRobin);
        let auth = registry.register_service(&auth_config()).unwrap();
        auth.instances[0].mark_healthy();
        auth.instances[1].mark_unhealthy();

        for _ in 0..10 {
            let lease = registry.get_healthy_instance("auth").unwrap();
            assert_eq!(lease.url.as_str(), "http://10.0.0.1:4001/");
        }
    }

    #[test]
    fn test_no_healthy_instance_errors() {
        let registry = registry(Strategy::Random);
        let auth = registry.register_service(&auth_config()).unwrap();
        for instance in &auth.instances {
            instance.mark_unhealthy();
        }
        assert!(matches!(
            registry.get_healthy_instance("auth"),
            Err(RegistryError::NoHealthyInstance { .. })
        ));
        assert!(matches!(
            registry.get_healthy_instance("billing"),
            Err(RegistryError::UnknownService { .. })
        ));
    }

    #[test]
    fn test_round_robin_visits_all_healthy() {
        let registry = registry(Strategy::RoundRobin);
        registry.register_service(&auth_config()).unwrap();
        let seen: HashSet<String> = (0..4)
            .map(|_| registry.get_healthy_instance("auth").unwrap().url.to_string())
            .collect();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_least_connections_spreads_in_flight() {
        let registry = registry(Strategy::LeastConnections);
        registry.register_service(&auth_config()).unwrap();
        let first = registry.get_healthy_instance("auth").unwrap();
        let second = registry.get_healthy_instance("auth").unwrap();
        assert_ne!(first.url, second.url);
    }

    #[test]
    fn test_dependencies_are_advisory() {
        let registry = registry(Strategy::RoundRobin);
        let auth = registry.register_service(&auth_config()).unwrap();
        let mut content = ServiceConfig::new("content", vec!["http://10.0.0.3:4100".into()]);
        content.dependencies = vec!["auth".into()];
        registry.register_service(&content).unwrap();

        // Never probed: unknown is not healthy.
        assert!(!registry.are_dependencies_healthy("content"));

        auth.instances[0].mark_healthy();
        auth.finish_health_check();
        assert!(registry.are_dependencies_healthy("content"));

        // Advisory only: content still serves while auth is down.
        for instance in &auth.instances {
            instance.mark_unhealthy();
        }
        auth.finish_health_check();
        assert!(!registry.are_dependencies_healthy("content"));
        assert!(registry.get_healthy_instance("content").is_ok());
    }

    #[test]
    fn test_registration_configures_breaker_timeout() {
        let registry = registry(Strategy::RoundRobin);
        let mut config = auth_config();
        config.timeout_ms = 1500;
        registry.register_service(&config).unwrap();
        assert_eq!(registry.breakers().get("auth").config().timeout_ms, 1500);
    }

    #[test]
    fn test_services_sorted_by_priority() {
        let registry = registry(Strategy::RoundRobin);
        let mut low = ServiceConfig::new("search", vec!["http://10.0.0.9:1".into()]);
        low.priority = 1;
        let mut high = auth_config();
        high.priority = 10;
        registry.register_service(&low).unwrap();
        registry.register_service(&high).unwrap();
        let names: Vec<_> = registry.services().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["auth", "search"]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["auth"].instance_count, 2);
        assert_eq!(snapshot["auth"].priority, 10);
    }
}
