//! HTTP broker transport.
//!
//! # Wire Contract
//! ```text
//! GET  /health                             → 200 when the broker is up
//! POST /events            (JSON envelope)  → 200 {"eventId": "..."}
//! GET  /events/stream?eventPattern=<glob>  → text/event-stream
//! ```
//!
//! Stream frames carry one JSON document in their `data:` lines. The
//! first frame is a `{"type":"connection"}` notice and is not dispatched.

use async_trait::async_trait;
use futures_util::stream;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use url::Url;

use crate::event_bus::envelope::Event;
use crate::event_bus::error::BusError;
use crate::event_bus::transport::{BrokerTransport, EventStream, StreamMessage};

/// Largest unterminated frame a stream may buffer before it is dropped.
const MAX_FRAME_BYTES: usize = 1024 * 1024;

pub struct HttpBroker {
    base: Url,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    event_id: String,
}

impl HttpBroker {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, BusError> {
        self.base
            .join(path)
            .map_err(|e| BusError::InvalidBrokerUrl(format!("{}{}: {}", self.base, path, e)))
    }
}

fn unreachable(err: reqwest::Error) -> BusError {
    BusError::BrokerUnreachable(err.to_string())
}

#[async_trait]
impl BrokerTransport for HttpBroker {
    async fn health(&self) -> Result<(), BusError> {
        let response = self
            .client
            .get(self.endpoint("/health")?)
            .send()
            .await
            .map_err(unreachable)?;
        if response.status() == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(BusError::BrokerUnreachable(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    async fn publish(&self, event: &Event) -> Result<String, BusError> {
        let response = self
            .client
            .post(self.endpoint("/events")?)
            .json(event)
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(BusError::PublishRejected {
                event_type: event.event_type.clone(),
                status: status.as_u16(),
            });
        }

        let body: PublishResponse = response.json().await.map_err(|_| BusError::PublishRejected {
            event_type: event.event_type.clone(),
            status: status.as_u16(),
        })?;
        Ok(body.event_id)
    }

    async fn open_stream(&self, pattern: &str) -> Result<EventStream, BusError> {
        let mut url = self.endpoint("/events/stream")?;
        url.query_pairs_mut().append_pair("eventPattern", pattern);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| BusError::Subscription {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(BusError::Subscription {
                pattern: pattern.to_string(),
                reason: format!("stream endpoint returned {}", response.status()),
            });
        }

        let state = SseState {
            response: Some(response),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            failure: None,
            pattern: pattern.to_string(),
        };
        Ok(Box::pin(stream::unfold(state, next_message)))
    }
}

struct SseState {
    response: Option<reqwest::Response>,
    decoder: SseDecoder,
    pending: VecDeque<StreamMessage>,
    /// Reported once the frames decoded before it are drained.
    failure: Option<BusError>,
    pattern: String,
}

async fn next_message(mut state: SseState) -> Option<(Result<StreamMessage, BusError>, SseState)> {
    loop {
        if let Some(message) = state.pending.pop_front() {
            return Some((Ok(message), state));
        }
        if let Some(error) = state.failure.take() {
            return Some((Err(error), state));
        }
        let response = state.response.as_mut()?;
        let chunk = response.chunk().await;
        let reason = match chunk {
            Ok(Some(bytes)) => {
                for frame in state.decoder.feed(&bytes) {
                    if let Some(message) = decode_frame(&frame, &state.pattern) {
                        state.pending.push_back(message);
                    }
                }
                if !state.decoder.exceeds_limit() {
                    continue;
                }
                format!("unterminated frame larger than {} bytes", state.decoder.limit)
            }
            Ok(None) => "stream closed by broker".to_string(),
            Err(e) => e.to_string(),
        };
        state.response = None;
        state.failure = Some(BusError::Subscription {
            pattern: state.pattern.clone(),
            reason,
        });
    }
}

fn decode_frame(frame: &SseFrame, pattern: &str) -> Option<StreamMessage> {
    if frame.event.as_deref() == Some("connection") {
        return Some(StreamMessage::Connected);
    }
    let value: Value = match serde_json::from_str(&frame.data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Dropping malformed stream frame");
            return None;
        }
    };
    if value.get("type").and_then(Value::as_str) == Some("connection") {
        return Some(StreamMessage::Connected);
    }
    match serde_json::from_value::<Event>(value) {
        Ok(event) => Some(StreamMessage::Event(event)),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Dropping stream frame that is not an event");
            None
        }
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser; chunks may split frames anywhere.
#[derive(Debug)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    /// The unfinished frame has outgrown the limit.
    pub(crate) fn exceeds_limit(&self) -> bool {
        self.buffer.len() > self.limit
    }

    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&block[..end]);
            if let Some(frame) = parse_block(&text) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(text: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => data.push(value),
            "event" => event = Some(value.to_string()),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: {\"type\":\"conn").is_empty());
        let frames = decoder.feed(b"ection\"}\r\n\r\n: keep-alive\n\nevent: message\ndata: 1\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"type\":\"connection\"}");
        assert_eq!(frames[1].event.as_deref(), Some("message"));
        assert_eq!(frames[1].data, "1");
    }

    #[test]
    fn test_unterminated_frame_hits_limit() {
        let mut decoder = SseDecoder::with_limit(32);
        assert!(decoder.feed(b"data: 1\n\ndata: ").len() == 1);
        assert!(!decoder.exceeds_limit());

        let frames = decoder.feed(&[b'x'; 40]);
        assert!(frames.is_empty());
        assert!(decoder.exceeds_limit());
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b"data: {\ndata: \"a\": 1}\n\n");
        assert_eq!(frames[0].data, "{\n\"a\": 1}");
    }

    #[test]
    fn test_decode_frames() {
        let connected = SseFrame {
            event: None,
            data: r#"{"type":"connection","message":"Connected to event stream"}"#.to_string(),
        };
        assert_eq!(decode_frame(&connected, "*"), Some(StreamMessage::Connected));

        let event = SseFrame {
            event: None,
            data: r#"{"eventType":"link.analysis.requested","data":{"linkId":"L1"},
                      "metadata":{"source":"content","timestamp":"2026-01-01T00:00:00Z",
                                  "version":"1.0","correlationId":"c1"}}"#
                .to_string(),
        };
        match decode_frame(&event, "*") {
            Some(StreamMessage::Event(event)) => {
                assert_eq!(event.event_type, "link.analysis.requested");
                assert_eq!(event.correlation_id(), "c1");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let garbage = SseFrame {
            event: None,
            data: "not json".to_string(),
        };
        assert_eq!(decode_frame(&garbage, "*"), None);
    }
}
