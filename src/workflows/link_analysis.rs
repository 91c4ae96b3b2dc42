//! Link analysis workflow.
//!
//! ```text
//! link.analysis.requested {linkId, url}
//!     → (dedup on linkId) link.analysis.started
//!     → analyzer
//!         ok  → link.analysis.completed {riskScore, threats}
//!               + link.threat.detected when riskScore >= threat_threshold
//!         err → link.analysis.error
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::event_bus::{
    BusError, Event, EventBusClient, EventHandler, HandlerError, PublishOptions, WorkflowTracker,
};
use crate::registry::{RegistryError, ServiceRegistry};
use crate::resilience::{BreakerError, DownstreamError};

pub const ANALYSIS_REQUESTED: &str = "link.analysis.requested";
pub const ANALYSIS_STARTED: &str = "link.analysis.started";
pub const ANALYSIS_COMPLETED: &str = "link.analysis.completed";
pub const ANALYSIS_ERROR: &str = "link.analysis.error";
pub const THREAT_DETECTED: &str = "link.threat.detected";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub link_id: String,
    pub url: String,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// 0.0 (benign) to 1.0 (certainly malicious).
    pub risk_score: f64,
    #[serde(default)]
    pub threats: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Breaker(#[from] BreakerError),

    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),
}

/// Scores a link. Detection heuristics live behind this seam.
#[async_trait]
pub trait LinkAnalyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError>;
}

/// Calls `POST /analyze` on a healthy instance of the analysis service.
pub struct RemoteAnalyzer {
    registry: Arc<ServiceRegistry>,
    service: String,
    client: reqwest::Client,
}

impl RemoteAnalyzer {
    pub fn new(registry: Arc<ServiceRegistry>, service: impl Into<String>) -> Self {
        Self {
            registry,
            service: service.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LinkAnalyzer for RemoteAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let lease = self.registry.get_healthy_instance(&self.service)?;
        let endpoint = lease
            .url
            .join("/analyze")
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;

        let body = self
            .registry
            .breakers()
            .execute(&self.service, || async {
                let response = self
                    .client
                    .post(endpoint.clone())
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| DownstreamError::Network(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(DownstreamError::Status(status.as_u16()));
                }
                response
                    .text()
                    .await
                    .map_err(|e| DownstreamError::Network(e.to_string()))
            })
            .await?
            .into_inner();

        serde_json::from_str(&body).map_err(|e| AnalysisError::InvalidResponse(e.to_string()))
    }
}

/// Handler for `link.analysis.requested`.
pub struct LinkAnalysisWorkflow {
    bus: EventBusClient,
    tracker: Arc<WorkflowTracker>,
    analyzer: Arc<dyn LinkAnalyzer>,
    threat_threshold: f64,
}

impl LinkAnalysisWorkflow {
    pub fn new(
        bus: EventBusClient,
        tracker: Arc<WorkflowTracker>,
        analyzer: Arc<dyn LinkAnalyzer>,
        threat_threshold: f64,
    ) -> Self {
        Self {
            bus,
            tracker,
            analyzer,
            threat_threshold,
        }
    }

    pub fn workflow_key(link_id: &str) -> String {
        format!("link-analysis:{}", link_id)
    }

    /// Start an analysis for `event`. `Ok(None)` when one is already in flight for the link.
    pub fn start(&self, event: &Event) -> Result<Option<JoinHandle<()>>, HandlerError> {
        let request: AnalysisRequest = serde_json::from_value(event.data.clone())
            .map_err(|e| HandlerError::invalid_payload(&event.event_type, e))?;

        let key = Self::workflow_key(&request.link_id);
        let run = analyze_link(
            self.bus.clone(),
            self.analyzer.clone(),
            self.threat_threshold,
            request.clone(),
            event.clone(),
        );
        match self
            .tracker
            .spawn(key, request.requested_by.clone(), request.priority, run)
        {
            Ok(handle) => Ok(Some(handle)),
            Err(in_flight) => {
                tracing::info!(
                    workflow = %in_flight.key,
                    correlation_id = %event.correlation_id(),
                    "Analysis already in flight, ignoring duplicate request"
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl EventHandler for LinkAnalysisWorkflow {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.start(event).map(|_| ())
    }
}

async fn analyze_link(
    bus: EventBusClient,
    analyzer: Arc<dyn LinkAnalyzer>,
    threat_threshold: f64,
    request: AnalysisRequest,
    cause: Event,
) {
    emit(
        &bus,
        &cause,
        ANALYSIS_STARTED,
        json!({ "linkId": request.link_id, "url": request.url }),
    )
    .await;

    match analyzer.analyze(&request).await {
        Ok(result) => {
            tracing::info!(
                link_id = %request.link_id,
                risk_score = result.risk_score,
                correlation_id = %cause.correlation_id(),
                "Link analysis completed"
            );
            emit(
                &bus,
                &cause,
                ANALYSIS_COMPLETED,
                json!({
                    "linkId": request.link_id,
                    "url": request.url,
                    "riskScore": result.risk_score,
                    "threats": result.threats,
                }),
            )
            .await;

            if result.risk_score >= threat_threshold {
                emit(
                    &bus,
                    &cause,
                    THREAT_DETECTED,
                    json!({
                        "linkId": request.link_id,
                        "url": request.url,
                        "riskScore": result.risk_score,
                        "threats": result.threats,
                    }),
                )
                .await;
            }
        }
        Err(e) => {
            tracing::warn!(
                link_id = %request.link_id,
                correlation_id = %cause.correlation_id(),
                error = %e,
                "Link analysis failed"
            );
            emit(
                &bus,
                &cause,
                ANALYSIS_ERROR,
                json!({ "linkId": request.link_id, "url": request.url, "error": e.to_string() }),
            )
            .await;
        }
    }
}

async fn emit(bus: &EventBusClient, cause: &Event, event_type: &str, data: Value) {
    match bus
        .publish(event_type, data, PublishOptions::caused_by(cause))
        .await
    {
        Ok(_) | Err(BusError::BrokerUnreachable(_)) => {}
        Err(e) => {
            tracing::warn!(event_type = %event_type, error = %e, "Workflow event not published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventBusConfig;
    use crate::event_bus::InMemoryBroker;

    struct FixedAnalyzer(f64);

    #[async_trait]
    impl LinkAnalyzer for FixedAnalyzer {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
            Ok(AnalysisResult {
                risk_score: self.0,
                threats: vec!["phishing".to_string()],
            })
        }
    }

    struct FailingAnalyzer;

    #[async_trait]
    impl LinkAnalyzer for FailingAnalyzer {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
            Err(AnalysisError::InvalidResponse("scanner offline".to_string()))
        }
    }

    fn setup(analyzer: Arc<dyn LinkAnalyzer>) -> (LinkAnalysisWorkflow, Arc<InMemoryBroker>, Arc<WorkflowTracker>) {
        let broker = Arc::new(InMemoryBroker::new());
        let bus = EventBusClient::new(EventBusConfig::default(), broker.clone());
        let tracker = Arc::new(WorkflowTracker::new());
        let workflow = LinkAnalysisWorkflow::new(bus, tracker.clone(), analyzer, 0.7);
        (workflow, broker, tracker)
    }

    fn request(link_id: &str) -> Event {
        Event::new(
            ANALYSIS_REQUESTED,
            json!({ "linkId": link_id, "url": "https://example.test/login" }),
            "content",
            Some("corr-L".to_string()),
        )
    }

    fn types(broker: &InMemoryBroker) -> Vec<String> {
        broker.published().into_iter().map(|e| e.event_type).collect()
    }

    #[tokio::test]
    async fn test_high_risk_emits_threat() {
        let (workflow, broker, tracker) = setup(Arc::new(FixedAnalyzer(0.9)));
        workflow.start(&request("L1")).unwrap().unwrap().await.unwrap();

        assert_eq!(
            types(&broker),
            vec![ANALYSIS_STARTED, ANALYSIS_COMPLETED, THREAT_DETECTED]
        );
        assert!(broker
            .published()
            .iter()
            .all(|e| e.correlation_id() == "corr-L"));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_low_risk_has_no_threat() {
        let (workflow, broker, _) = setup(Arc::new(FixedAnalyzer(0.2)));
        workflow.start(&request("L2")).unwrap().unwrap().await.unwrap();
        assert_eq!(types(&broker), vec![ANALYSIS_STARTED, ANALYSIS_COMPLETED]);
    }

    #[tokio::test]
    async fn test_analyzer_failure_emits_error_and_releases_key() {
        let (workflow, broker, tracker) = setup(Arc::new(FailingAnalyzer));
        workflow.start(&request("L3")).unwrap().unwrap().await.unwrap();

        assert_eq!(types(&broker), vec![ANALYSIS_STARTED, ANALYSIS_ERROR]);
        let error = broker.published().pop().unwrap();
        assert_eq!(error.data["linkId"], "L3");
        assert!(!tracker.is_in_flight(&LinkAnalysisWorkflow::workflow_key("L3")));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_handler_error() {
        let (workflow, _, _) = setup(Arc::new(FixedAnalyzer(0.1)));
        let event = Event::new(ANALYSIS_REQUESTED, json!({ "url": 5 }), "content", None);
        assert!(matches!(
            workflow.handle(&event).await,
            Err(HandlerError::InvalidPayload { .. })
        ));
    }
}
