//! Downstream instance abstraction.
//!
//! # Responsibilities
//! - Represent a single instance of a downstream service
//! - Track in-flight calls (for Least Connections LB)
//! - Track health state and the time of the last probe

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Registered but not yet probed; eligible for traffic.
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A single instance of a downstream service.
#[derive(Debug)]
pub struct Instance {
    /// Base URL of the instance.
    pub url: Url,
    /// Number of calls currently holding a lease.
    active_connections: AtomicUsize,
    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    /// Consecutive failed probes.
    consecutive_failures: AtomicU32,
    last_checked: Mutex<Option<DateTime<Utc>>>,
}

impl Instance {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            active_connections: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicU32::new(0),
            last_checked: Mutex::new(None),
        }
    }

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Eligible for selection: Healthy, or Unknown before the first probe.
    pub fn is_healthy(&self) -> bool {
        self.health_state() != HealthState::Unhealthy
    }

    /// Record a passing probe.
    pub fn mark_healthy(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.state.store(HealthState::Healthy as u8, Ordering::Release);
        self.touch();
    }

    /// Record a failing probe, returning the new consecutive failure count.
    pub fn mark_unhealthy(&self) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.store(HealthState::Unhealthy as u8, Ordering::Release);
        self.touch();
        failures
    }

    fn touch(&self) {
        *self
            .last_checked
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        *self
            .last_checked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Get the current number of in-flight calls.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Take a lease that counts as one in-flight call until dropped.
    pub fn lease(self: &Arc<Self>) -> InstanceLease {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        InstanceLease {
            instance: self.clone(),
        }
    }
}

/// A RAII guard that manages the in-flight call count.
#[derive(Debug)]
pub struct InstanceLease {
    instance: Arc<Instance>,
}

impl InstanceLease {
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Deref for InstanceLease {
    type Target = Instance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        self.instance
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}
