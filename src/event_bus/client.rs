//! Event bus client.
//!
//! # Responsibilities
//! - Publish events, stamping source and correlation metadata
//! - Hold events that could not reach the broker in an ordered retry queue
//! - Keep subscriptions supervised and restart them on `initialize()`
//! - Report handler failures as `<namespace>.event.error` events
//!
//! # Delivery
//! Publishing is at-least-once across outages: an event that fails with
//! `BrokerUnreachable` is queued exactly once and resent, in order, by the
//! next successful `initialize()`. Rejected events are not queued.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use url::Url;

use crate::config::EventBusConfig;
use crate::event_bus::envelope::{Event, PublishOptions};
use crate::event_bus::error::{BusError, HandlerError};
use crate::event_bus::handlers::EventHandler;
use crate::event_bus::http_broker::HttpBroker;
use crate::event_bus::memory::InMemoryBroker;
use crate::event_bus::subscription::Subscription;
use crate::event_bus::transport::BrokerTransport;
use crate::observability::metrics;

const MEMORY_BROKER_URL: &str = "memory://";
const DIAGNOSTIC_SUFFIX: &str = ".event.error";

/// Cloneable handle to the shared client state.
#[derive(Clone)]
pub struct EventBusClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: EventBusConfig,
    transport: Arc<dyn BrokerTransport>,
    connected: AtomicBool,
    retry_queue: Mutex<VecDeque<Event>>,
    /// Serializes resends so the queue head is only popped by one flush.
    flushing: tokio::sync::Mutex<()>,
    subscriptions: Mutex<Vec<Subscription>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStatus {
    pub connected: bool,
    pub retry_queue_length: usize,
    pub subscriptions: Vec<SubscriptionStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub pattern: String,
    pub running: bool,
    pub connected: bool,
}

impl EventBusClient {
    pub fn new(config: EventBusConfig, transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                connected: AtomicBool::new(false),
                retry_queue: Mutex::new(VecDeque::new()),
                flushing: tokio::sync::Mutex::new(()),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Build the transport named by `broker_url`.
    pub fn from_config(config: &EventBusConfig) -> Result<Self, BusError> {
        let transport: Arc<dyn BrokerTransport> = if config.broker_url == MEMORY_BROKER_URL {
            Arc::new(InMemoryBroker::new())
        } else {
            let url = Url::parse(&config.broker_url)
                .map_err(|e| BusError::InvalidBrokerUrl(format!("{}: {}", config.broker_url, e)))?;
            Arc::new(HttpBroker::new(url))
        };
        Ok(Self::new(config.clone(), transport))
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> Arc<dyn BrokerTransport> {
        self.inner.transport.clone()
    }

    pub fn source(&self) -> &str {
        &self.inner.config.service_name
    }

    /// Result of the last health check or publish attempt.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    fn retry_queue(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.inner
            .retry_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn retry_queue_len(&self) -> usize {
        self.retry_queue().len()
    }

    /// Disconnected, or some subscription has stopped retrying.
    pub fn needs_initialize(&self) -> bool {
        if !self.is_connected() || self.retry_queue_len() > 0 {
            return true;
        }
        self.subscriptions().iter().any(|sub| !sub.is_running())
    }

    /// Health-check the broker, re-establish subscriptions, then resend queued events.
    pub async fn initialize(&self) -> Result<(), BusError> {
        let timeout = self.inner.config.publish_timeout();
        let health = tokio::time::timeout(timeout, self.inner.transport.health())
            .await
            .unwrap_or_else(|_| {
                Err(BusError::BrokerUnreachable(format!(
                    "health check timed out after {:?}",
                    timeout
                )))
            });

        if let Err(e) = health {
            self.set_connected(false);
            tracing::warn!(error = %e, queued = self.retry_queue_len(), "Event bus initialization failed");
            return Err(e);
        }
        self.set_connected(true);

        self.ensure_subscriptions(timeout).await;
        let resent = self.flush_retry_queue().await;
        tracing::info!(
            resent,
            queued = self.retry_queue_len(),
            "Event bus initialized"
        );
        Ok(())
    }

    /// Restart every subscription that is not connected and wait for it to open.
    async fn ensure_subscriptions(&self, limit: Duration) {
        // A disconnected supervisor holds no unread events, so replacing it
        // loses nothing; the dispatcher keeps draining what was already read.
        let watchers: Vec<(String, tokio::sync::watch::Receiver<bool>)> = self
            .subscriptions()
            .iter_mut()
            .map(|sub| {
                if !sub.is_connected() {
                    sub.start(self);
                }
                (sub.pattern().to_string(), sub.watch_connected())
            })
            .collect();

        for (pattern, mut watcher) in watchers {
            let opened = matches!(
                tokio::time::timeout(limit, watcher.wait_for(|connected| *connected)).await,
                Ok(Ok(_))
            );
            if !opened {
                tracing::warn!(pattern = %pattern, "Subscription not re-established during initialization");
            }
        }
    }

    /// Resend queued events in order. Returns how many were delivered.
    ///
    /// Each event stays at the head of the queue until the broker accepts
    /// it, so events queued by concurrent publishes land behind it.
    pub async fn flush_retry_queue(&self) -> usize {
        let _flushing = self.inner.flushing.lock().await;

        let mut budget = self.retry_queue_len();
        let mut resent = 0;
        while budget > 0 {
            budget -= 1;
            let head = self.retry_queue().front().cloned();
            let Some(event) = head else {
                break;
            };
            match self.send(&event).await {
                Ok(event_id) => {
                    self.retry_queue().pop_front();
                    resent += 1;
                    metrics::record_publish("resent");
                    tracing::debug!(event_type = %event.event_type, event_id = %event_id, "Resent queued event");
                }
                Err(e @ BusError::BrokerUnreachable(_)) => {
                    // Broker went away again; the head and everything behind it stay queued.
                    tracing::warn!(event_type = %event.event_type, error = %e, "Resend failed, flush stopped");
                    self.set_connected(false);
                    break;
                }
                Err(e) => {
                    tracing::warn!(event_type = %event.event_type, error = %e, "Resend rejected, moved to the tail");
                    let mut queue = self.retry_queue();
                    if let Some(rejected) = queue.pop_front() {
                        queue.push_back(rejected);
                    }
                }
            }
        }
        metrics::record_retry_queue_depth(self.retry_queue_len());
        resent
    }

    fn enqueue(&self, event: Event) {
        let mut queue = self.retry_queue();
        queue.push_back(event);
        metrics::record_retry_queue_depth(queue.len());
    }

    async fn send(&self, event: &Event) -> Result<String, BusError> {
        let timeout = self.inner.config.publish_timeout();
        match tokio::time::timeout(timeout, self.inner.transport.publish(event)).await {
            Ok(Ok(event_id)) if !event_id.is_empty() => {
                self.set_connected(true);
                Ok(event_id)
            }
            Ok(Ok(_)) => Err(BusError::PublishRejected {
                event_type: event.event_type.clone(),
                status: 200,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BusError::BrokerUnreachable(format!(
                "publish timed out after {:?}",
                timeout
            ))),
        }
    }

    /// Build an envelope and publish it.
    pub async fn publish(
        &self,
        event_type: &str,
        data: Value,
        options: PublishOptions,
    ) -> Result<String, BusError> {
        let source = options
            .source
            .unwrap_or_else(|| self.source().to_string());
        let event = Event::new(event_type, data, source, options.correlation_id);
        self.publish_event(event).await
    }

    /// Publish a prepared envelope; queued for resend when the broker is unreachable.
    pub async fn publish_event(&self, event: Event) -> Result<String, BusError> {
        match self.send(&event).await {
            Ok(event_id) => {
                metrics::record_publish("sent");
                tracing::debug!(
                    event_type = %event.event_type,
                    correlation_id = %event.correlation_id(),
                    event_id = %event_id,
                    "Event published"
                );
                Ok(event_id)
            }
            Err(e @ BusError::BrokerUnreachable(_)) => {
                self.set_connected(false);
                metrics::record_publish("queued");
                tracing::warn!(
                    event_type = %event.event_type,
                    correlation_id = %event.correlation_id(),
                    error = %e,
                    "Broker unreachable, event queued for retry"
                );
                self.enqueue(event);
                Err(e)
            }
            Err(e) => {
                metrics::record_publish("rejected");
                tracing::warn!(
                    event_type = %event.event_type,
                    correlation_id = %event.correlation_id(),
                    error = %e,
                    "Event rejected by broker"
                );
                Err(e)
            }
        }
    }

    /// Attach `handler` to events matching `pattern`. Must be called inside a Tokio runtime.
    pub fn subscribe(&self, pattern: &str, handler: Arc<dyn EventHandler>) {
        let mut subscription = Subscription::new(pattern, handler);
        subscription.start(self);
        self.subscriptions().push(subscription);
        tracing::info!(pattern = %pattern, "Subscription registered");
    }

    /// Publish a diagnostic for a failed handler. Diagnostics of diagnostics are only logged.
    pub(crate) async fn report_handler_error(&self, event: &Event, error: &HandlerError) {
        if event.event_type.ends_with(DIAGNOSTIC_SUFFIX) {
            tracing::error!(
                event_type = %event.event_type,
                correlation_id = %event.correlation_id(),
                error = %error,
                "Handler failed on a diagnostic event"
            );
            return;
        }

        let diagnostic = event.derive(
            format!("{}{}", event.namespace(), DIAGNOSTIC_SUFFIX),
            json!({
                "originalEventType": event.event_type,
                "originalSource": event.metadata.source,
                "error": error.to_string(),
            }),
            self.source(),
        );
        if let Err(e) = self.publish_event(diagnostic).await {
            tracing::warn!(error = %e, "Failed to publish handler diagnostic");
        }
    }

    pub fn status(&self) -> BusStatus {
        let subscriptions = self
            .subscriptions()
            .iter()
            .map(|sub| SubscriptionStatus {
                pattern: sub.pattern().to_string(),
                running: sub.is_running(),
                connected: sub.is_connected(),
            })
            .collect();
        BusStatus {
            connected: self.is_connected(),
            retry_queue_length: self.retry_queue_len(),
            subscriptions,
        }
    }

    /// Stop every subscription. Queued events are kept.
    pub fn shutdown(&self) {
        for sub in self.subscriptions().iter_mut() {
            sub.stop();
        }
        self.set_connected(false);
        let queued = self.retry_queue_len();
        if queued > 0 {
            tracing::warn!(queued, "Event bus stopped with undelivered events");
        }
    }
}
