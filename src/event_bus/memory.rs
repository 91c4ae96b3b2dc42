//! In-process broker.
//!
//! Backs `broker_url = "memory://"` for single-node deployments and tests.
//! Reachability can be toggled to simulate an outage; severing subscribers
//! ends every open stream the way a dropped push connection would.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::event_bus::envelope::{pattern_matches, Event};
use crate::event_bus::error::BusError;
use crate::event_bus::transport::{BrokerTransport, EventStream, StreamMessage};

const CHANNEL_CAPACITY: usize = 1024;

pub struct InMemoryBroker {
    reachable: AtomicBool,
    next_id: AtomicU64,
    sender: Mutex<broadcast::Sender<Event>>,
    published: Mutex<Vec<Event>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            reachable: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            sender: Mutex::new(sender),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Close every open subscription stream.
    pub fn sever_subscribers(&self) {
        let (fresh, _) = broadcast::channel(CHANNEL_CAPACITY);
        if let Ok(mut sender) = self.sender.lock() {
            *sender = fresh;
        }
    }

    /// Every event accepted so far, in publish order.
    pub fn published(&self) -> Vec<Event> {
        self.published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn ensure_reachable(&self) -> Result<(), BusError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(BusError::BrokerUnreachable(
                "in-memory broker is offline".to_string(),
            ))
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    async fn health(&self) -> Result<(), BusError> {
        self.ensure_reachable()
    }

    async fn publish(&self, event: &Event) -> Result<String, BusError> {
        self.ensure_reachable()?;
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut log) = self.published.lock() {
            log.push(event.clone());
        }
        if let Ok(sender) = self.sender.lock() {
            // No receivers is fine; the event is simply not observed.
            let _ = sender.send(event.clone());
        }
        Ok(id)
    }

    async fn open_stream(&self, pattern: &str) -> Result<EventStream, BusError> {
        self.ensure_reachable()?;
        let receiver = self
            .sender
            .lock()
            .map(|sender| sender.subscribe())
            .map_err(|_| BusError::Subscription {
                pattern: pattern.to_string(),
                reason: "broker state poisoned".to_string(),
            })?;

        let events = stream::unfold(
            (receiver, pattern.to_string()),
            |(mut receiver, pattern)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if pattern_matches(&pattern, &event.event_type) => {
                            return Some((Ok(StreamMessage::Event(event)), (receiver, pattern)));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(pattern = %pattern, skipped, "Subscriber lagged behind in-memory broker");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(Box::pin(
            stream::once(async { Ok(StreamMessage::Connected) }).chain(events),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_stream_filters_by_pattern() {
        let broker = InMemoryBroker::new();
        let mut stream = broker.open_stream("link.*").await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(StreamMessage::Connected)));

        broker
            .publish(&Event::new("community.report.submitted", json!({}), "t", None))
            .await
            .unwrap();
        broker
            .publish(&Event::new("link.analysis.requested", json!({}), "t", None))
            .await
            .unwrap();

        match stream.next().await {
            Some(Ok(StreamMessage::Event(event))) => {
                assert_eq!(event.event_type, "link.analysis.requested")
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(broker.published().len(), 2);
    }

    #[tokio::test]
    async fn test_offline_broker_refuses() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        assert!(matches!(broker.health().await, Err(BusError::BrokerUnreachable(_))));
        let event = Event::new("a.b.c", json!({}), "t", None);
        assert!(matches!(broker.publish(&event).await, Err(BusError::BrokerUnreachable(_))));
        assert!(broker.open_stream("*").await.is_err());
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_sever_ends_streams() {
        let broker = InMemoryBroker::new();
        let mut stream = broker.open_stream("*").await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(StreamMessage::Connected)));
        broker.sever_subscribers();
        assert_eq!(stream.next().await, None);
    }
}
