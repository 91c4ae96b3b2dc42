//! Event handlers and type-based routing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::event_bus::envelope::Event;
use crate::event_bus::error::HandlerError;

/// Application logic attached to a subscription.
///
/// A returned error is reported as a `<namespace>.event.error` event; it
/// never stops the subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Outcome of routing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Handled,
    /// No handler is registered for the event type.
    Unrouted,
}

/// Dispatches on the exact event type.
#[derive(Clone, Default)]
pub struct EventRouter {
    routes: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.routes.insert(event_type.into(), handler);
        self
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub async fn dispatch(&self, event: &Event) -> Result<Routed, HandlerError> {
        match self.routes.get(&event.event_type) {
            Some(handler) => {
                handler.handle(event).await?;
                Ok(Routed::Handled)
            }
            None => Ok(Routed::Unrouted),
        }
    }
}

#[async_trait]
impl EventHandler for EventRouter {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        if self.dispatch(event).await? == Routed::Unrouted {
            tracing::debug!(
                event_type = %event.event_type,
                correlation_id = %event.correlation_id(),
                "No handler for event type"
            );
        }
        Ok(())
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        handler_fn(move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_routes_by_exact_type() {
        let links = Arc::new(AtomicUsize::new(0));
        let reports = Arc::new(AtomicUsize::new(0));
        let router = EventRouter::new()
            .on("link.analysis.requested", counting(links.clone()))
            .on("community.report.submitted", counting(reports.clone()));

        let event = Event::new("link.analysis.requested", json!({}), "t", None);
        assert_eq!(router.dispatch(&event).await.unwrap(), Routed::Handled);

        let other = Event::new("link.analysis.completed", json!({}), "t", None);
        assert_eq!(router.dispatch(&other).await.unwrap(), Routed::Unrouted);
        router.handle(&other).await.unwrap();

        assert_eq!(links.load(Ordering::SeqCst), 1);
        assert_eq!(reports.load(Ordering::SeqCst), 0);
        assert_eq!(
            router.event_types(),
            vec!["community.report.submitted", "link.analysis.requested"]
        );
    }

    #[tokio::test]
    async fn test_handler_errors_propagate() {
        let router = EventRouter::new().on(
            "link.analysis.requested",
            handler_fn(|_event| async { Err(HandlerError::Failed("boom".to_string())) }),
        );
        let event = Event::new("link.analysis.requested", json!({}), "t", None);
        assert!(router.handle(&event).await.is_err());
    }
}
