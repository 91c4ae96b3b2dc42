//! Active health checking against real HTTP instances.

use std::sync::Arc;
use std::time::Duration;

use edge_gateway::config::{CircuitBreakerConfig, HealthCheckConfig, ServiceConfig};
use edge_gateway::health::{HealthMonitor, HttpProbe};
use edge_gateway::load_balancer::Strategy;
use edge_gateway::registry::{RegistryError, ServiceRegistry, ServiceStatus};
use edge_gateway::resilience::CircuitBreakers;

mod common;

fn registry() -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::new(
        Arc::new(CircuitBreakers::new(CircuitBreakerConfig::default())),
        Strategy::RoundRobin,
    ))
}

fn monitor(registry: &Arc<ServiceRegistry>) -> HealthMonitor {
    HealthMonitor::new(
        registry.clone(),
        Arc::new(HttpProbe::new()),
        HealthCheckConfig {
            enabled: true,
            interval_secs: 1,
            timeout_secs: 1,
        },
    )
}

#[tokio::test]
async fn test_only_healthy_instance_is_selected() {
    let healthy = common::start_mock_backend(200, r#"{"status":"ok"}"#).await;
    let failing = common::start_mock_backend(500, r#"{"status":"down"}"#).await;

    let registry = registry();
    registry
        .register_service(&ServiceConfig::new(
            "auth",
            vec![format!("http://{}", healthy), format!("http://{}", failing)],
        ))
        .unwrap();

    let status = monitor(&registry)
        .check_service(&registry.service("auth").unwrap())
        .await;
    assert_eq!(status, ServiceStatus::Healthy);

    let expected = format!("http://{}/", healthy);
    for _ in 0..10 {
        let lease = registry.get_healthy_instance("auth").unwrap();
        assert_eq!(lease.url.as_str(), expected);
    }

    let snapshot = registry.snapshot();
    assert_eq!(snapshot["auth"].instance_count, 2);
    assert_eq!(snapshot["auth"].healthy_count, 1);
}

#[tokio::test]
async fn test_non_200_success_status_is_unhealthy() {
    let created = common::start_mock_backend(201, "{}").await;
    let registry = registry();
    registry
        .register_service(&ServiceConfig::new("content", vec![format!("http://{}", created)]))
        .unwrap();

    let status = monitor(&registry)
        .check_service(&registry.service("content").unwrap())
        .await;
    assert_eq!(status, ServiceStatus::Unhealthy);
    assert!(matches!(
        registry.get_healthy_instance("content"),
        Err(RegistryError::NoHealthyInstance { .. })
    ));
}

#[tokio::test]
async fn test_slow_instance_times_out_and_recovers() {
    let slow = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let flag = slow.clone();
    let backend = common::start_programmable_backend(move |_| {
        let slow = flag.load(std::sync::atomic::Ordering::SeqCst);
        async move {
            if slow {
                tokio::time::sleep(Duration::from_millis(1500)).await;
            }
            (200, "{}".to_string())
        }
    })
    .await;

    let registry = registry();
    registry
        .register_service(&ServiceConfig::new("search", vec![format!("http://{}", backend)]))
        .unwrap();
    let monitor = monitor(&registry);
    let service = registry.service("search").unwrap();

    assert_eq!(monitor.check_service(&service).await, ServiceStatus::Unhealthy);
    assert_eq!(service.instances[0].consecutive_failures(), 1);

    slow.store(false, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(monitor.check_service(&service).await, ServiceStatus::Healthy);
    assert!(registry.get_healthy_instance("search").is_ok());
}

#[tokio::test]
async fn test_dependencies_follow_service_status() {
    let up = common::start_mock_backend(200, "{}").await;
    let down = common::dead_address().await;

    let registry = registry();
    registry
        .register_service(&ServiceConfig::new("identity", vec![format!("http://{}", up)]))
        .unwrap();
    registry
        .register_service(&ServiceConfig::new("link-analysis", vec![format!("http://{}", down)]))
        .unwrap();
    let mut content = ServiceConfig::new("content", vec![format!("http://{}", up)]);
    content.dependencies = vec!["identity".to_string(), "link-analysis".to_string()];
    registry.register_service(&content).unwrap();

    // Unknown status before the first round does not count as healthy.
    assert!(!registry.are_dependencies_healthy("content"));

    monitor(&registry).check_all().await;
    assert_eq!(registry.service("identity").unwrap().status(), ServiceStatus::Healthy);
    assert_eq!(registry.service("link-analysis").unwrap().status(), ServiceStatus::Unhealthy);
    assert!(!registry.are_dependencies_healthy("content"));
    assert!(registry.are_dependencies_healthy("identity"));
}
