//! Supervised subscriptions.
//!
//! Each subscription runs two tasks:
//!
//! ```text
//! supervisor: open_stream → read messages → bounded queue
//!             (on loss: sleep retry_delay * 2^(n-1), reopen, give up after max_retries)
//! dispatcher: bounded queue → handler → on error publish <namespace>.event.error
//! ```
//!
//! The retry counter resets whenever a stream opens. A supervisor that gave
//! up stays finished until the client's `initialize()` restarts it. Restarts
//! replace only the supervisor; the dispatcher and its queue live until
//! `stop()`, so events already read from the broker are still handled.

use futures_util::stream::StreamExt;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::EventBusConfig;
use crate::event_bus::client::EventBusClient;
use crate::event_bus::envelope::Event;
use crate::event_bus::error::HandlerError;
use crate::event_bus::handlers::EventHandler;
use crate::event_bus::transport::{BrokerTransport, StreamMessage};
use crate::observability::metrics;
use crate::resilience::backoff::reconnect_delay;

pub(crate) struct Subscription {
    pattern: String,
    handler: Arc<dyn EventHandler>,
    connected: Arc<watch::Sender<bool>>,
    queue: Option<mpsc::Sender<Event>>,
    supervisor: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(pattern: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            pattern: pattern.into(),
            handler,
            connected: Arc::new(connected),
            queue: None,
            supervisor: None,
            dispatcher: None,
        }
    }

    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The supervisor is still connected or still retrying.
    pub(crate) fn is_running(&self) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub(crate) fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub(crate) fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// (Re)start the supervisor with a fresh retry counter.
    pub(crate) fn start(&mut self, client: &EventBusClient) {
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
        self.connected.send_replace(false);
        self.connected = Arc::new(watch::channel(false).0);
        let queue = self.ensure_dispatcher(client);

        self.supervisor = Some(tokio::spawn(supervise(
            self.pattern.clone(),
            client.transport(),
            client.config().clone(),
            queue,
            self.connected.clone(),
        )));
    }

    /// Sender into the running dispatcher, spawning one if none is alive.
    fn ensure_dispatcher(&mut self, client: &EventBusClient) -> mpsc::Sender<Event> {
        if let (Some(queue), Some(dispatcher)) = (&self.queue, &self.dispatcher) {
            if !dispatcher.is_finished() {
                return queue.clone();
            }
        }
        let capacity = client.config().dispatch_queue_capacity.max(1);
        let (queue, inbox) = mpsc::channel(capacity);
        self.dispatcher = Some(tokio::spawn(dispatch(
            inbox,
            self.handler.clone(),
            client.clone(),
        )));
        self.queue = Some(queue.clone());
        queue
    }

    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
        self.queue = None;
        self.connected.send_replace(false);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn supervise(
    pattern: String,
    transport: Arc<dyn BrokerTransport>,
    config: EventBusConfig,
    queue: mpsc::Sender<Event>,
    connected: Arc<watch::Sender<bool>>,
) {
    let mut retry_count: u32 = 0;

    loop {
        match transport.open_stream(&pattern).await {
            Ok(mut stream) => {
                retry_count = 0;
                connected.send_replace(true);
                tracing::info!(pattern = %pattern, "Subscription established");

                while let Some(message) = stream.next().await {
                    match message {
                        Ok(StreamMessage::Connected) => {
                            tracing::debug!(pattern = %pattern, "Broker acknowledged subscription");
                        }
                        Ok(StreamMessage::Event(event)) => {
                            if queue.send(event).await.is_err() {
                                // Dispatcher is gone; the subscription was stopped.
                                connected.send_replace(false);
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(pattern = %pattern, error = %e, "Subscription stream lost");
                            break;
                        }
                    }
                }
                connected.send_replace(false);
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Failed to open subscription stream");
            }
        }

        retry_count += 1;
        if retry_count > config.max_retries {
            tracing::error!(
                pattern = %pattern,
                max_retries = config.max_retries,
                "Subscription gave up reconnecting; waiting for re-initialization"
            );
            return;
        }

        let delay = reconnect_delay(retry_count, config.retry_delay());
        tracing::info!(
            pattern = %pattern,
            attempt = retry_count,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting subscription"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn dispatch(
    mut inbox: mpsc::Receiver<Event>,
    handler: Arc<dyn EventHandler>,
    client: EventBusClient,
) {
    while let Some(event) = inbox.recv().await {
        let outcome = AssertUnwindSafe(handler.handle(&event))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(HandlerError::Failed("event handler panicked".to_string())));

        match outcome {
            Ok(()) => metrics::record_event_handled(&event.event_type, "ok"),
            Err(e) => {
                metrics::record_event_handled(&event.event_type, "error");
                tracing::warn!(
                    event_type = %event.event_type,
                    correlation_id = %event.correlation_id(),
                    error = %e,
                    "Event handler failed"
                );
                client.report_handler_error(&event, &e).await;
            }
        }
    }
}
