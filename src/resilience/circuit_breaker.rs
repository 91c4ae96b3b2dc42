//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through and are counted
//! - Open: downstream assumed down, calls fail fast (or hit the fallback)
//! - Half-Open: up to `capacity` probe calls test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: samples >= volume_threshold AND failure% >= error_threshold_percentage
//!                (both within the rolling window)
//! Open → Half-Open: after reset_timeout
//! Half-Open → Closed: first completed probe succeeds (window reset)
//! Half-Open → Open: first completed probe fails
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global), see `breakers.rs`
//! - The breaker never retries; retry policy belongs to the caller
//! - Only transient failures are counted (see `error.rs`); a 4xx answer
//!   proves the downstream is alive and counts as a success
//! - The fallback only runs when the call is rejected, never after a
//!   failed call

use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::error::DownstreamError;
use crate::resilience::rolling::{RollingStats, RollingWindow};
use crate::resilience::timeouts::with_timeout;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Outcomes and transitions reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    Success,
    Failure,
    CircuitOpen,
    CircuitClose,
    CircuitHalfOpen,
    FallbackExecuted,
    RequestRejected,
}

impl BreakerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerEvent::Success => "success",
            BreakerEvent::Failure => "failure",
            BreakerEvent::CircuitOpen => "circuit_open",
            BreakerEvent::CircuitClose => "circuit_close",
            BreakerEvent::CircuitHalfOpen => "circuit_half_open",
            BreakerEvent::FallbackExecuted => "fallback_executed",
            BreakerEvent::RequestRejected => "request_rejected",
        }
    }
}

/// Lifetime counters for one breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub circuit_opens: u64,
    pub circuit_closes: u64,
    pub half_opens: u64,
    pub fallbacks_executed: u64,
    pub rejected: u64,
    pub average_latency_ms: f64,
}

impl BreakerMetrics {
    fn observe_latency(&mut self, latency: Duration) {
        let completed = (self.successes + self.failures).max(1) as f64;
        let sample = latency.as_secs_f64() * 1000.0;
        self.average_latency_ms += (sample - self.average_latency_ms) / completed;
    }
}

/// Read-only view exposed on the status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub rolling_stats: RollingStats,
    pub metrics: BreakerMetrics,
    pub enabled: bool,
}

/// Errors raised by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The circuit is open (or half-open at capacity) and no fallback exists.
    #[error("circuit open for service '{service}'")]
    CircuitOpen { service: String },

    /// The call ran and failed.
    #[error("call to service '{service}' failed: {source}")]
    Downstream {
        service: String,
        #[source]
        source: DownstreamError,
    },
}

impl BreakerError {
    pub fn service(&self) -> &str {
        match self {
            BreakerError::CircuitOpen { service } | BreakerError::Downstream { service, .. } => {
                service
            }
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen { .. })
    }

    pub fn downstream(&self) -> Option<&DownstreamError> {
        match self {
            BreakerError::Downstream { source, .. } => Some(source),
            BreakerError::CircuitOpen { .. } => None,
        }
    }
}

/// Result of a guarded call, tagged with where the value came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<T> {
    pub value: T,
    pub from_fallback: bool,
}

impl<T> Guarded<T> {
    fn primary(value: T) -> Self {
        Self {
            value,
            from_fallback: false,
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            from_fallback: true,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    /// Breaker disabled: count, never gate.
    Passthrough,
    Closed,
    Probe { generation: u64 },
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Bumped on every entry into half-open; probes carry it.
    generation: u64,
    probes_in_flight: u32,
    window: RollingWindow,
    metrics: BreakerMetrics,
}

/// Guard around one downstream call type.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window = RollingWindow::new(config.rolling_window(), config.rolling_count_buckets);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                generation: 0,
                probes_in_flight: 0,
                window,
                metrics: BreakerMetrics::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying the Open → Half-Open timer.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        BreakerSnapshot {
            state: inner.state,
            rolling_stats: inner.window.stats(now),
            metrics: inner.metrics.clone(),
            enabled: self.config.enabled,
        }
    }

    /// Run `call` through the breaker.
    ///
    /// While open the call is never invoked and
    /// [`BreakerError::CircuitOpen`] is returned.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<Guarded<T>, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DownstreamError>>,
    {
        self.run(call, None::<fn() -> std::future::Ready<T>>).await
    }

    /// Like [`execute`](Self::execute), but a rejected call returns the
    /// fallback's value tagged `from_fallback`.
    pub async fn execute_with_fallback<T, F, Fut, FB, FutB>(
        &self,
        call: F,
        fallback: FB,
    ) -> Result<Guarded<T>, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DownstreamError>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = T>,
    {
        self.run(call, Some(fallback)).await
    }

    async fn run<T, F, Fut, FB, FutB>(
        &self,
        call: F,
        fallback: Option<FB>,
    ) -> Result<Guarded<T>, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DownstreamError>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = T>,
    {
        let Some(permit) = self.admit() else {
            self.reject(fallback.is_some());
            return match fallback {
                Some(fallback) => Ok(Guarded::fallback(fallback().await)),
                None => Err(BreakerError::CircuitOpen {
                    service: self.name.clone(),
                }),
            };
        };

        let admission = Admission {
            breaker: self,
            permit,
            settled: false,
        };
        let started = Instant::now();
        let result = with_timeout(self.config.timeout(), call()).await;
        let latency = started.elapsed();
        metrics::record_call_duration(&self.name, latency);

        match result {
            Ok(value) => {
                admission.settle(true, latency);
                Ok(Guarded::primary(value))
            }
            Err(source) => {
                admission.settle(!source.is_transient(), latency);
                Err(BreakerError::Downstream {
                    service: self.name.clone(),
                    source,
                })
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: BreakerEvent) {
        metrics::record_breaker_event(&self.name, event.as_str());
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        if elapsed >= self.config.reset_timeout() {
            inner.state = CircuitState::HalfOpen;
            inner.generation += 1;
            inner.probes_in_flight = 0;
            inner.metrics.half_opens += 1;
            self.emit(BreakerEvent::CircuitHalfOpen);
            metrics::record_breaker_state(&self.name, inner.state);
            tracing::info!(service = %self.name, "Circuit half-open, admitting probes");
        }
    }

    fn admit(&self) -> Option<Permit> {
        let mut inner = self.lock();
        inner.metrics.total_requests += 1;
        if !self.config.enabled {
            return Some(Permit::Passthrough);
        }
        self.refresh(&mut inner, Instant::now());
        match inner.state {
            CircuitState::Closed => Some(Permit::Closed),
            CircuitState::HalfOpen if inner.probes_in_flight < self.config.capacity => {
                inner.probes_in_flight += 1;
                Some(Permit::Probe {
                    generation: inner.generation,
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    fn reject(&self, with_fallback: bool) {
        let mut inner = self.lock();
        inner.metrics.rejected += 1;
        self.emit(BreakerEvent::RequestRejected);
        if with_fallback {
            inner.metrics.fallbacks_executed += 1;
            self.emit(BreakerEvent::FallbackExecuted);
        }
        tracing::debug!(service = %self.name, fallback = with_fallback, "Call rejected by open circuit");
    }

    fn complete(&self, permit: Permit, success: bool, latency: Duration) {
        let now = Instant::now();
        let mut inner = self.lock();
        if success {
            inner.metrics.successes += 1;
            self.emit(BreakerEvent::Success);
        } else {
            inner.metrics.failures += 1;
            self.emit(BreakerEvent::Failure);
        }
        inner.metrics.observe_latency(latency);

        match permit {
            Permit::Passthrough => {}
            Permit::Closed => {
                // Calls admitted before a trip finish into the next state and are ignored.
                if inner.state == CircuitState::Closed {
                    inner.window.record(success, now);
                    self.evaluate(&mut inner, now);
                }
            }
            Permit::Probe { generation } => {
                if inner.state == CircuitState::HalfOpen && inner.generation == generation {
                    if success {
                        self.close(&mut inner);
                    } else {
                        self.trip(&mut inner, now);
                    }
                }
            }
        }
    }

    /// Release a probe slot for a call whose future was dropped.
    fn abandon(&self, permit: Permit) {
        if let Permit::Probe { generation } = permit {
            let mut inner = self.lock();
            if inner.state == CircuitState::HalfOpen && inner.generation == generation {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            }
        }
    }

    fn evaluate(&self, inner: &mut Inner, now: Instant) {
        let stats = inner.window.stats(now);
        if stats.failures > 0
            && stats.samples() >= self.config.volume_threshold
            && stats.error_percentage() >= f64::from(self.config.error_threshold_percentage)
        {
            tracing::warn!(
                service = %self.name,
                samples = stats.samples(),
                error_percentage = stats.error_percentage(),
                "Failure threshold exceeded"
            );
            self.trip(inner, now);
        }
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.probes_in_flight = 0;
        inner.metrics.circuit_opens += 1;
        self.emit(BreakerEvent::CircuitOpen);
        metrics::record_breaker_state(&self.name, inner.state);
        tracing::warn!(
            service = %self.name,
            reset_timeout_ms = self.config.reset_timeout_ms,
            "Circuit opened"
        );
    }

    fn close(&self, inner: &mut Inner) {
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.probes_in_flight = 0;
        inner.window.reset();
        inner.metrics.circuit_closes += 1;
        self.emit(BreakerEvent::CircuitClose);
        metrics::record_breaker_state(&self.name, inner.state);
        tracing::info!(service = %self.name, "Circuit closed");
    }
}

/// Settles a permit exactly once; dropping it unsettled frees the probe slot.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, success: bool, latency: Duration) {
        self.settled = true;
        self.breaker.complete(self.permit, success, latency);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(self.permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(threshold: u8, volume: u64, reset_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            error_threshold_percentage: threshold,
            volume_threshold: volume,
            reset_timeout_ms: reset_ms,
            ..CircuitBreakerConfig::default()
        }
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<Guarded<&'static str>, BreakerError> {
        cb.execute(|| async { Ok("ok") }).await
    }

    async fn fail(cb: &CircuitBreaker) -> Result<Guarded<&'static str>, BreakerError> {
        cb.execute(|| async { Err(DownstreamError::Status(503)) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_recovers() {
        let cb = CircuitBreaker::new("content", config(50, 4, 1000));

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let err = succeed(&cb).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(err.service(), "content");

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let probe = succeed(&cb).await.unwrap();
        assert!(!probe.from_fallback);
        assert_eq!(cb.state(), CircuitState::Closed);

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.rolling_stats.samples(), 0);
        assert_eq!(snapshot.metrics.circuit_opens, 1);
        assert_eq!(snapshot.metrics.circuit_closes, 1);
        assert_eq!(snapshot.metrics.half_opens, 1);
        // The fifth fed call and the explicit check above.
        assert_eq!(snapshot.metrics.rejected, 2);
    }

    #[tokio::test]
    async fn test_open_never_invokes_call() {
        let cb = CircuitBreaker::new("auth", config(50, 1, 60_000));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let result = cb
                .execute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            assert!(matches!(result, Err(BreakerError::CircuitOpen { .. })));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_tagged_when_open() {
        let cb = CircuitBreaker::new("auth", config(50, 1, 60_000));
        let _ = fail(&cb).await;

        let result = cb
            .execute_with_fallback(|| async { Ok("live") }, || async { "cached" })
            .await
            .unwrap();
        assert_eq!(result, Guarded { value: "cached", from_fallback: true });

        let metrics = cb.snapshot().metrics;
        assert_eq!(metrics.fallbacks_executed, 1);
        assert_eq!(metrics.rejected, 1);
    }

    #[tokio::test]
    async fn test_fallback_not_used_for_failed_call() {
        let cb = CircuitBreaker::new("auth", config(50, 10, 60_000));
        let result = cb
            .execute_with_fallback(
                || async { Err::<&str, _>(DownstreamError::Status(500)) },
                || async { "cached" },
            )
            .await;
        assert!(matches!(
            result,
            Err(BreakerError::Downstream { source: DownstreamError::Status(500), .. })
        ));
    }

    #[tokio::test]
    async fn test_client_errors_never_open() {
        let cb = CircuitBreaker::new("content", config(50, 2, 60_000));
        for _ in 0..10 {
            let result = cb
                .execute(|| async { Err::<(), _>(DownstreamError::Status(404)) })
                .await;
            assert_eq!(
                result.unwrap_err().downstream(),
                Some(&DownstreamError::Status(404))
            );
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_ratio_ignored_below_volume() {
        let cb = CircuitBreaker::new("content", config(50, 5, 60_000));
        for _ in 0..4 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let cb = CircuitBreaker::new("content", config(50, 1, 50));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn test_half_open_capacity_and_first_probe_decides() {
        let cb = Arc::new(CircuitBreaker::new("content", config(50, 1, 50)));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let slow = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    let _ = release_rx.await;
                    Err::<(), _>(DownstreamError::Status(500))
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Capacity is 1: a second probe is rejected while the first runs.
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());

        let _ = release_tx.send(());
        let outcome = slow.await.unwrap();
        assert!(outcome.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_dropped_probe_frees_slot() {
        let cb = CircuitBreaker::new("content", config(50, 1, 50));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            cb.execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let mut cfg = config(50, 1, 60_000);
        cfg.timeout_ms = 20;
        let cb = CircuitBreaker::new("slow", cfg);

        let err = cb
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downstream(),
            Some(DownstreamError::Timeout(_))
        ));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_disabled_breaker_only_counts() {
        let mut cfg = config(50, 1, 60_000);
        cfg.enabled = false;
        let cb = CircuitBreaker::new("content", cfg);
        for _ in 0..5 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        let snapshot = cb.snapshot();
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.metrics.failures, 5);
        assert_eq!(snapshot.metrics.total_requests, 5);
    }
}
