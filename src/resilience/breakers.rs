//! Table of per-service circuit breakers.
//!
//! One breaker per name, created lazily with the default thresholds or
//! explicitly with a per-service configuration. The table is owned and
//! injected; nothing here is global.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::config::CircuitBreakerConfig;
use crate::resilience::circuit_breaker::{
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState, Guarded,
};
use crate::resilience::error::DownstreamError;

#[derive(Debug)]
pub struct CircuitBreakers {
    defaults: CircuitBreakerConfig,
    table: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            table: DashMap::new(),
        }
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Breaker for `name`, created with the defaults on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.table.get(name) {
            return existing.clone();
        }
        self.table
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.defaults.clone())))
            .clone()
    }

    /// Install a breaker with its own configuration, replacing any existing one.
    pub fn configure(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        self.table.insert(name.to_string(), breaker.clone());
        breaker
    }

    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.table.get(name).map(|b| b.state())
    }

    pub async fn execute<T, F, Fut>(&self, name: &str, call: F) -> Result<Guarded<T>, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DownstreamError>>,
    {
        self.get(name).execute(call).await
    }

    pub async fn execute_with_fallback<T, F, Fut, FB, FutB>(
        &self,
        name: &str,
        call: F,
        fallback: FB,
    ) -> Result<Guarded<T>, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DownstreamError>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = T>,
    {
        self.get(name).execute_with_fallback(call, fallback).await
    }

    /// Snapshot of every breaker, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
