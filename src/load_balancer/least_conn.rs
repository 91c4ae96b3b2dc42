//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{instance::Instance, LoadBalancer};

/// Least connections selector.
/// Selects the instance with the fewest outstanding leases.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_instance(&self, healthy: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        // In case of tie, the first one is selected (stability)
        healthy
            .iter()
            .min_by_key(|i| i.active_connections())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let b1 = Arc::new(Instance::new(Url::parse("http://127.0.0.1:8080").unwrap()));
        let b2 = Arc::new(Instance::new(Url::parse("http://127.0.0.1:8081").unwrap()));

        let _l1 = b1.lease();
        let instances = vec![b1.clone(), b2.clone()];

        // Should pick b2 (0 in flight)
        let s1 = lb.next_instance(&instances).unwrap();
        assert_eq!(s1.url, b2.url);

        let _l2 = b2.lease();
        let _l3 = b2.lease(); // now b2 has 2, b1 has 1

        let s2 = lb.next_instance(&instances).unwrap();
        assert_eq!(s2.url, b1.url);
    }
}
