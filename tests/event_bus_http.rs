//! Event bus client against an HTTP + SSE broker.

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edge_gateway::config::EventBusConfig;
use edge_gateway::event_bus::{
    handler_fn, BusError, Event, EventBusClient, HandlerError, PublishOptions,
};

mod common;

fn bus_config(addr: std::net::SocketAddr) -> EventBusConfig {
    EventBusConfig {
        enabled: true,
        broker_url: format!("http://{}", addr),
        service_name: "edge-gateway".to_string(),
        publish_timeout_ms: 200,
        retry_delay_ms: 20,
        max_retries: 3,
        ..Default::default()
    }
}

fn recorder() -> (Arc<dyn edge_gateway::event_bus::EventHandler>, Arc<Mutex<Vec<Event>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = handler_fn(move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(event);
            Ok::<(), HandlerError>(())
        }
    });
    (handler, seen)
}

#[tokio::test]
async fn test_publish_and_stream_round_trip() {
    let (addr, broker) = common::start_mock_broker(Duration::from_millis(500)).await;
    let client = EventBusClient::from_config(&bus_config(addr)).unwrap();
    let (handler, seen) = recorder();
    client.subscribe("link.*", handler);
    client.initialize().await.unwrap();
    assert!(client.is_connected());

    let id = client
        .publish(
            "link.analysis.requested",
            json!({ "linkId": "L1", "url": "https://example.test" }),
            PublishOptions::correlated("corr-http"),
        )
        .await
        .unwrap();
    assert!(id.starts_with("evt-"));

    client
        .publish("community.report.submitted", json!({}), PublishOptions::default())
        .await
        .unwrap();

    assert!(common::eventually(|| seen.lock().unwrap().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "pattern must filter other namespaces");
    assert_eq!(seen[0].event_type, "link.analysis.requested");
    assert_eq!(seen[0].correlation_id(), "corr-http");
    assert_eq!(seen[0].data["linkId"], "L1");

    let wire = &broker.received()[0];
    assert_eq!(wire["metadata"]["source"], "edge-gateway");
    assert_eq!(wire["metadata"]["version"], "1.0");
    client.shutdown();
}

#[tokio::test]
async fn test_outage_queues_then_initialize_delivers_once() {
    let (addr, broker) = common::start_mock_broker(Duration::from_millis(500)).await;
    let client = EventBusClient::from_config(&bus_config(addr)).unwrap();
    let (handler, seen) = recorder();
    client.subscribe("link.analysis.requested", handler);
    client.initialize().await.unwrap();

    broker.set_reachable(false);
    let err = client
        .publish(
            "link.analysis.requested",
            json!({ "linkId": "E1" }),
            PublishOptions::correlated("corr-E1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::BrokerUnreachable(_)));
    assert_eq!(client.retry_queue_len(), 1);
    assert!(client.initialize().await.is_err());
    assert_eq!(client.retry_queue_len(), 1);

    broker.set_reachable(true);
    client.initialize().await.unwrap();
    assert_eq!(client.retry_queue_len(), 0);

    assert!(common::eventually(|| !seen.lock().unwrap().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].correlation_id(), "corr-E1");
    let delivered = broker
        .received()
        .iter()
        .filter(|e| e["metadata"]["correlationId"] == "corr-E1")
        .count();
    assert_eq!(delivered, 1);
    client.shutdown();
}

#[tokio::test]
async fn test_unreachable_broker_at_startup() {
    let dead = common::dead_address().await;
    let client = EventBusClient::from_config(&bus_config(dead)).unwrap();
    assert!(matches!(
        client.initialize().await,
        Err(BusError::BrokerUnreachable(_))
    ));
    assert!(!client.is_connected());
    assert!(client.needs_initialize());

    let err = client
        .publish("link.analysis.requested", json!({}), PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::BrokerUnreachable(_)));
    assert_eq!(client.retry_queue_len(), 1);
}
