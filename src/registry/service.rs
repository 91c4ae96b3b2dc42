//! A registered downstream service and its live health view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use url::Url;

use crate::config::ServiceConfig;
use crate::load_balancer::{Instance, InstanceLease, LoadBalancer, Strategy};
use crate::registry::RegistryError;

/// Probe outcomes kept for the rolling success rate and latency.
const PROBE_HISTORY: usize = 100;

/// Aggregate health of a service.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// No probe round has completed yet.
    Unknown = 0,
    /// At least one instance passed its last probe.
    Healthy = 1,
    /// Every instance failed its last probe.
    Unhealthy = 2,
}

impl From<u8> for ServiceStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => ServiceStatus::Healthy,
            2 => ServiceStatus::Unhealthy,
            _ => ServiceStatus::Unknown,
        }
    }
}

#[derive(Debug, Default)]
struct ProbeStats {
    samples: VecDeque<(bool, Duration)>,
}

impl ProbeStats {
    fn record(&mut self, success: bool, latency: Duration) {
        if self.samples.len() == PROBE_HISTORY {
            self.samples.pop_front();
        }
        self.samples.push_back((success, latency));
    }

    fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let passed = self.samples.iter().filter(|(ok, _)| *ok).count();
        passed as f64 * 100.0 / self.samples.len() as f64
    }

    fn average_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .samples
            .iter()
            .map(|(_, latency)| latency.as_secs_f64() * 1000.0)
            .sum();
        total / self.samples.len() as f64
    }
}

/// Registry status surface for one service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub status: ServiceStatus,
    pub instance_count: usize,
    pub healthy_count: usize,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub average_response_time: f64,
    pub priority: u32,
    pub dependencies: Vec<String>,
}

/// A downstream service: its instances, probe settings and health record.
#[derive(Debug)]
pub struct DownstreamService {
    pub name: String,
    pub instances: Vec<Arc<Instance>>,
    pub health_check_path: String,
    pub timeout: Duration,
    pub retries: u32,
    pub priority: u32,
    pub dependencies: Vec<String>,
    balancer: Box<dyn LoadBalancer>,
    status: AtomicU8,
    consecutive_failures: AtomicU32,
    last_health_check: Mutex<Option<DateTime<Utc>>>,
    probes: Mutex<ProbeStats>,
}

impl DownstreamService {
    pub fn from_config(config: &ServiceConfig, strategy: Strategy) -> Result<Self, RegistryError> {
        let instances = config
            .instances
            .iter()
            .map(|raw| {
                Url::parse(raw)
                    .map(|url| Arc::new(Instance::new(url)))
                    .map_err(|source| RegistryError::InvalidInstance {
                        service: config.name.clone(),
                        url: raw.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: config.name.clone(),
            instances,
            health_check_path: config.health_check_path.clone(),
            timeout: config.timeout(),
            retries: config.retries,
            priority: config.priority,
            dependencies: config.dependencies.clone(),
            balancer: strategy.build(),
            status: AtomicU8::new(ServiceStatus::Unknown as u8),
            consecutive_failures: AtomicU32::new(0),
            last_health_check: Mutex::new(None),
            probes: Mutex::new(ProbeStats::default()),
        })
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn healthy_instances(&self) -> Vec<Arc<Instance>> {
        self.instances
            .iter()
            .filter(|i| i.is_healthy())
            .cloned()
            .collect()
    }

    /// Pick a healthy instance and lease it.
    ///
    /// The pick is re-checked after leasing so a concurrent probe that
    /// flips the instance unhealthy cannot leak it out.
    pub fn select(&self) -> Option<InstanceLease> {
        for _ in 0..=self.instances.len() {
            let healthy = self.healthy_instances();
            let picked = self.balancer.next_instance(&healthy)?;
            let lease = picked.lease();
            if lease.is_healthy() {
                return Some(lease);
            }
        }
        None
    }

    /// Breaker name guarding the probes of one instance.
    pub fn health_breaker_key(&self, index: usize) -> String {
        format!("{}/health#{}", self.name, index)
    }

    /// Record one probe outcome.
    pub fn record_probe(&self, success: bool, latency: Duration) {
        if success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(success, latency);
    }

    /// Close a probe round: recompute status and stamp the check time.
    pub fn finish_health_check(&self) -> ServiceStatus {
        let status = if self.instances.iter().any(|i| i.is_healthy()) {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };
        let previous = ServiceStatus::from(self.status.swap(status as u8, Ordering::AcqRel));
        *self
            .last_health_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        if previous != status {
            tracing::info!(service = %self.name, from = ?previous, to = ?status, "Service status changed");
        }
        status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let (success_rate, average_response_time) = {
            let probes = self.probes.lock().unwrap_or_else(PoisonError::into_inner);
            (probes.success_rate(), probes.average_latency_ms())
        };
        ServiceSnapshot {
            status: self.status(),
            instance_count: self.instances.len(),
            healthy_count: self.instances.iter().filter(|i| i.is_healthy()).count(),
            last_health_check: *self
                .last_health_check
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            consecutive_failures: self.consecutive_failures(),
            success_rate,
            average_response_time,
            priority: self.priority,
            dependencies: self.dependencies.clone(),
        }
    }
}
