//! Shared utilities for integration testing.
#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use edge_gateway::config::GatewayConfig;
use edge_gateway::event_bus::{pattern_matches, Event};
use edge_gateway::http::HttpServer;
use edge_gateway::lifecycle::{Gateway, Shutdown};

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        201 => "201 Created",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Read one request head plus its Content-Length body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(head_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buffer[..head_end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buffer.len() >= head_end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).to_string()
}

/// Start a programmable mock backend on an ephemeral port.
///
/// The closure receives the raw request text and returns status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let request = read_request(&mut socket).await;
                        let (status, body) = f(request).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_line(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start a mock backend that always returns the same response.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (status, body.to_string()) }).await
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Build and serve a gateway on an ephemeral port. Background tasks
/// (health monitor, bus watchdog) are not started.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Gateway, Shutdown) {
    let shutdown = Shutdown::new();
    let gateway = Gateway::build(config.clone(), shutdown.clone()).unwrap();
    let server = HttpServer::new(&config, gateway.app_state());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let wait = shutdown.wait();
    tokio::spawn(async move {
        let _ = server.run(listener, wait).await;
    });
    (addr, gateway, shutdown)
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Axum stand-in for the event broker, speaking the same HTTP + SSE contract.
#[derive(Clone)]
pub struct MockBroker {
    reachable: Arc<AtomicBool>,
    /// While unreachable, requests stall this long before answering.
    stall: Duration,
    next_id: Arc<AtomicU64>,
    events: broadcast::Sender<Value>,
    received: Arc<Mutex<Vec<Value>>>,
}

impl MockBroker {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    async fn stall_if_down(&self) -> bool {
        if self.reachable.load(Ordering::SeqCst) {
            return false;
        }
        tokio::time::sleep(self.stall).await;
        true
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    event_pattern: String,
}

async fn broker_health(State(broker): State<MockBroker>) -> impl IntoResponse {
    if broker.stall_if_down().await {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({ "status": "healthy" })).into_response()
}

async fn broker_publish(State(broker): State<MockBroker>, Json(event): Json<Value>) -> impl IntoResponse {
    if broker.stall_if_down().await {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let id = broker.next_id.fetch_add(1, Ordering::SeqCst);
    broker.received.lock().unwrap().push(event.clone());
    let _ = broker.events.send(event);
    Json(json!({ "success": true, "eventId": format!("evt-{}", id) })).into_response()
}

async fn broker_stream(
    State(broker): State<MockBroker>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = broker.events.subscribe();
    let pattern = query.event_pattern;

    let hello = stream::once(async {
        Ok::<_, Infallible>(
            SseEvent::default().data(r#"{"type":"connection","message":"Connected to event stream"}"#),
        )
    });
    let events = stream::unfold((receiver, pattern), |(mut receiver, pattern)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let event_type = event["eventType"].as_str().unwrap_or_default().to_string();
                    if pattern_matches(&pattern, &event_type) {
                        let frame = SseEvent::default().data(event.to_string());
                        return Some((Ok(frame), (receiver, pattern)));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(hello.chain(events)).keep_alive(KeepAlive::default())
}

/// Start the mock broker on an ephemeral port.
pub async fn start_mock_broker(stall: Duration) -> (SocketAddr, MockBroker) {
    let (events, _) = broadcast::channel(256);
    let broker = MockBroker {
        reachable: Arc::new(AtomicBool::new(true)),
        stall,
        next_id: Arc::new(AtomicU64::new(1)),
        events,
        received: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/health", get(broker_health))
        .route("/events", post(broker_publish))
        .route("/events/stream", get(broker_stream))
        .with_state(broker.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, broker)
}

/// Envelope check helper.
pub fn event_types(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.event_type.clone()).collect()
}
