//! Event envelope.
//!
//! ```text
//! {
//!   "eventType": "<namespace>.<entity>.<verb>",
//!   "data": { ... },
//!   "metadata": { "source", "timestamp" (ISO-8601), "version": "1.0", "correlationId" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const ENVELOPE_VERSION: &str = "1.0";

/// A domain event as it travels through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    pub metadata: EventMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default = "unknown_source")]
    pub source: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "envelope_version")]
    pub version: String,
    /// Generated on first publish when absent; copied by every derived event.
    #[serde(default = "new_correlation_id")]
    pub correlation_id: String,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

fn envelope_version() -> String {
    ENVELOPE_VERSION.to_string()
}

pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Caller-supplied metadata for a publish.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub correlation_id: Option<String>,
    pub source: Option<String>,
}

impl PublishOptions {
    pub fn correlated(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            source: None,
        }
    }

    /// Continue the correlation chain of `event`.
    pub fn caused_by(event: &Event) -> Self {
        Self::correlated(event.metadata.correlation_id.clone())
    }
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        data: Value,
        source: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: EventMetadata {
                source: source.into(),
                timestamp: Utc::now(),
                version: envelope_version(),
                correlation_id: correlation_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(new_correlation_id),
            },
        }
    }

    /// A follow-up event carrying this event's correlation id.
    pub fn derive(&self, event_type: impl Into<String>, data: Value, source: impl Into<String>) -> Self {
        Self::new(
            event_type,
            data,
            source,
            Some(self.metadata.correlation_id.clone()),
        )
    }

    pub fn correlation_id(&self) -> &str {
        &self.metadata.correlation_id
    }

    /// First dot-separated segment of the event type (`link` in `link.analysis.requested`).
    pub fn namespace(&self) -> &str {
        self.event_type
            .split('.')
            .next()
            .unwrap_or(self.event_type.as_str())
    }
}

/// Glob match where `*` spans any run of characters, dots included.
pub fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    let p = pattern.as_bytes();
    let t = event_type.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|b| *b == b'*')
}
