//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Registry lookup → service identified
//!     → registry filters instances to healthy ones
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through instances)
//!         - random.rs (uniform pick)
//!         - least_conn.rs (pick instance with fewest in-flight calls)
//!     → instance.rs (lease counted until the call completes)
//! ```
//!
//! # Design Decisions
//! - Balancers only ever see healthy instances
//! - Algorithm selection is global, one balancer per service
//! - In-flight counting is a lease guard, so least-connections is real

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

pub mod instance;
pub mod least_conn;
pub mod random;
pub mod round_robin;

pub use instance::{HealthState, Instance, InstanceLease};

/// Picks one instance from an already-filtered healthy set.
pub trait LoadBalancer: Send + Sync + Debug {
    fn next_instance(&self, healthy: &[Arc<Instance>]) -> Option<Arc<Instance>>;
}

/// Instance selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
}

impl Strategy {
    /// Build a fresh balancer with its own state.
    pub fn build(self) -> Box<dyn LoadBalancer> {
        match self {
            Strategy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
            Strategy::Random => Box::new(random::Random),
            Strategy::LeastConnections => Box::new(least_conn::LeastConnections::new()),
        }
    }
}
