//! Event-driven workflows.
//!
//! # Data Flow
//! ```text
//! content.item.created → (content service) link.analysis.requested
//!     → link_analysis.rs → started → completed | error (+ threat.detected)
//!
//! community.report.submitted
//!     → moderation.rs → admin.moderation.queue.updated (+ admin.security.alert)
//! ```
//!
//! Each workflow claims its key in the shared `WorkflowTracker` before doing
//! any work, so duplicate deliveries of the same request are no-ops.

pub mod link_analysis;
pub mod moderation;

use std::sync::Arc;

use crate::config::WorkflowConfig;
use crate::event_bus::{EventBusClient, EventRouter, WorkflowTracker};

pub use link_analysis::{
    AnalysisError, AnalysisRequest, AnalysisResult, LinkAnalysisWorkflow, LinkAnalyzer,
    RemoteAnalyzer,
};
pub use moderation::{ModerationWorkflow, Severity};

/// Routing table for the enabled workflows.
pub fn workflow_router(
    config: &WorkflowConfig,
    bus: &EventBusClient,
    tracker: &Arc<WorkflowTracker>,
    analyzer: Arc<dyn LinkAnalyzer>,
) -> EventRouter {
    let mut router = EventRouter::new();
    if config.link_analysis_enabled {
        router = router.on(
            link_analysis::ANALYSIS_REQUESTED,
            Arc::new(LinkAnalysisWorkflow::new(
                bus.clone(),
                tracker.clone(),
                analyzer,
                config.threat_threshold,
            )),
        );
    }
    if config.moderation_enabled {
        router = router.on(
            moderation::REPORT_SUBMITTED,
            Arc::new(ModerationWorkflow::new(bus.clone(), tracker.clone())),
        );
    }
    router
}
