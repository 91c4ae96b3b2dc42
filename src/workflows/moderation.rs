//! Community report moderation.
//!
//! `community.report.submitted` puts the reported content on the moderation
//! queue (`admin.moderation.queue.updated`); `high` and `critical` reports
//! also raise `admin.security.alert`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::event_bus::{
    BusError, Event, EventBusClient, EventHandler, HandlerError, PublishOptions, WorkflowTracker,
};

pub const REPORT_SUBMITTED: &str = "community.report.submitted";
pub const QUEUE_UPDATED: &str = "admin.moderation.queue.updated";
pub const SECURITY_ALERT: &str = "admin.security.alert";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn priority(self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn raises_alert(self) -> bool {
        self >= Severity::High
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSubmitted {
    pub report_id: String,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub reported_by: Option<String>,
}

/// Handler for `community.report.submitted`.
pub struct ModerationWorkflow {
    bus: EventBusClient,
    tracker: Arc<WorkflowTracker>,
}

impl ModerationWorkflow {
    pub fn new(bus: EventBusClient, tracker: Arc<WorkflowTracker>) -> Self {
        Self { bus, tracker }
    }

    pub fn workflow_key(report_id: &str) -> String {
        format!("moderation:{}", report_id)
    }

    async fn emit(&self, cause: &Event, event_type: &str, data: Value) -> Result<(), HandlerError> {
        match self
            .bus
            .publish(event_type, data, PublishOptions::caused_by(cause))
            .await
        {
            // Queued for resend; the report is not lost.
            Ok(_) | Err(BusError::BrokerUnreachable(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventHandler for ModerationWorkflow {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let report: ReportSubmitted = serde_json::from_value(event.data.clone())
            .map_err(|e| HandlerError::invalid_payload(&event.event_type, e))?;

        let guard = match self.tracker.try_begin(
            Self::workflow_key(&report.report_id),
            report.reported_by.clone(),
            report.severity.priority(),
        ) {
            Ok(guard) => guard,
            Err(in_flight) => {
                tracing::info!(workflow = %in_flight.key, "Report already being queued");
                return Ok(());
            }
        };
        guard.mark_running();

        self.emit(
            event,
            QUEUE_UPDATED,
            json!({
                "reportId": report.report_id,
                "contentId": report.content_id,
                "reason": report.reason,
                "severity": report.severity,
                "priority": report.severity.priority(),
                "queuedAt": Utc::now(),
            }),
        )
        .await?;

        if report.severity.raises_alert() {
            tracing::warn!(
                report_id = %report.report_id,
                severity = ?report.severity,
                correlation_id = %event.correlation_id(),
                "Raising security alert for report"
            );
            self.emit(
                event,
                SECURITY_ALERT,
                json!({
                    "reportId": report.report_id,
                    "contentId": report.content_id,
                    "severity": report.severity,
                    "reason": report.reason,
                }),
            )
            .await?;
        }
        Ok(())
    }
}
