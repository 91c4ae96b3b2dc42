//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::load_balancer::Strategy;

/// Root configuration for the edge gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Inbound request timeouts.
    pub timeouts: TimeoutConfig,

    /// Inbound request limits.
    pub limits: LimitsConfig,

    /// Circuit breaker defaults applied to every downstream.
    pub breaker: CircuitBreakerConfig,

    /// Instance selection settings.
    pub registry: RegistryConfig,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Downstream service definitions.
    pub services: Vec<ServiceConfig>,

    /// Gateway-level retry backoff for idempotent requests.
    pub retries: RetryConfig,

    /// Event broker client settings.
    pub event_bus: EventBusConfig,

    /// Event-driven workflow settings.
    pub workflows: WorkflowConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Status surface settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time budget for one inbound request in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Inbound request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// When false, calls pass straight through (still timed and counted).
    pub enabled: bool,

    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,

    /// Failure percentage at or above which the circuit opens.
    pub error_threshold_percentage: u8,

    /// Minimum samples in the rolling window before the ratio is considered.
    pub volume_threshold: u64,

    /// Time the circuit stays open before admitting probes, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Length of the rolling statistics window in milliseconds.
    pub rolling_count_timeout_ms: u64,

    /// Number of buckets the rolling window is split into.
    pub rolling_count_buckets: u32,

    /// Concurrent probe calls admitted while half-open.
    pub capacity: u32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_count_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 10_000,
            error_threshold_percentage: 50,
            volume_threshold: 5,
            reset_timeout_ms: 30_000,
            rolling_count_timeout_ms: 10_000,
            rolling_count_buckets: 10,
            capacity: 1,
        }
    }
}

/// Registry selection settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RegistryConfig {
    /// Instance selection strategy.
    pub strategy: Strategy,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
        }
    }
}

/// A downstream service and its instances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name used in routes and events.
    pub name: String,

    /// Base URLs of the service instances (e.g., "http://10.0.0.5:3000").
    pub instances: Vec<String>,

    /// Path probed by the health monitor.
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,

    /// Per-call deadline in milliseconds.
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts the gateway may retry idempotent requests.
    #[serde(default)]
    pub retries: u32,

    /// Higher priority services are listed first.
    #[serde(default)]
    pub priority: u32,

    /// Services this one needs to be useful (advisory).
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ServiceConfig {
    /// Minimal service definition with defaults for everything but instances.
    pub fn new(name: impl Into<String>, instances: Vec<String>) -> Self {
        Self {
            name: name.into(),
            instances,
            health_check_path: default_health_check_path(),
            timeout_ms: default_service_timeout_ms(),
            retries: 0,
            priority: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_service_timeout_ms() -> u64 {
    10_000
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Event broker client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Enable the event bus client.
    pub enabled: bool,

    /// Broker base URL, or "memory://" for the in-process broker.
    pub broker_url: String,

    /// Value stamped into `metadata.source` of published events.
    pub service_name: String,

    /// Deadline for one publish in milliseconds.
    pub publish_timeout_ms: u64,

    /// Base reconnect delay in milliseconds.
    pub retry_delay_ms: u64,

    /// Reconnect attempts before a subscription gives up.
    pub max_retries: u32,

    /// Buffered inbound events per subscription.
    pub dispatch_queue_capacity: usize,

    /// How often the watchdog re-runs `initialize()` while degraded.
    pub reinitialize_interval_secs: u64,
}

impl EventBusConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: "http://localhost:3010".to_string(),
            service_name: "edge-gateway".to_string(),
            publish_timeout_ms: 10_000,
            retry_delay_ms: 1_000,
            max_retries: 5,
            dispatch_queue_capacity: 256,
            reinitialize_interval_secs: 15,
        }
    }
}

/// Event-driven workflow configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Handle `link.analysis.requested` events.
    pub link_analysis_enabled: bool,

    /// Handle `community.report.submitted` events.
    pub moderation_enabled: bool,

    /// Registry name of the service that scores links.
    pub analysis_service: String,

    /// Risk score (0.0-1.0) at or above which a threat is reported.
    pub threat_threshold: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            link_analysis_enabled: true,
            moderation_enabled: true,
            analysis_service: "link-analysis".to_string(),
            threat_threshold: 0.7,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Status surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Expose `/admin/*` status routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
