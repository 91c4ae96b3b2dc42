//! Uniform random load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{instance::Instance, LoadBalancer};

#[derive(Debug, Default)]
pub struct Random;

impl LoadBalancer for Random {
    fn next_instance(&self, healthy: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        if healthy.is_empty() {
            return None;
        }
        Some(healthy[fastrand::usize(..healthy.len())].clone())
    }
}
