//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{instance::Instance, LoadBalancer};

/// Round-robin selector.
/// Stores a per-service counter to rotate through healthy instances.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_instance(&self, healthy: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        if healthy.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(healthy[index].clone())
    }
}
