//! In-flight workflow tracking.
//!
//! A workflow key (e.g. `link-analysis:<linkId>`) may be in flight at most
//! once. The entry is removed when the guard drops, whether the workflow
//! completed, failed or panicked.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEntry {
    pub key: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub requester: Option<String>,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("workflow '{key}' is already in flight")]
pub struct WorkflowAlreadyInFlight {
    pub key: String,
}

#[derive(Debug, Default)]
pub struct WorkflowTracker {
    entries: DashMap<String, WorkflowEntry>,
}

impl WorkflowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`; fails when the key is already tracked.
    pub fn try_begin(
        self: &Arc<Self>,
        key: impl Into<String>,
        requester: Option<String>,
        priority: u32,
    ) -> Result<WorkflowGuard, WorkflowAlreadyInFlight> {
        let key = key.into();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => return Err(WorkflowAlreadyInFlight { key }),
            Entry::Vacant(slot) => {
                slot.insert(WorkflowEntry {
                    key: key.clone(),
                    status: WorkflowStatus::Pending,
                    started_at: Utc::now(),
                    requester,
                    priority,
                });
            }
        }
        metrics::record_workflows_in_flight(self.len());
        Ok(WorkflowGuard {
            tracker: self.clone(),
            key,
        })
    }

    /// Claim `key` and run `task` on its own Tokio task.
    pub fn spawn<F>(
        self: &Arc<Self>,
        key: impl Into<String>,
        requester: Option<String>,
        priority: u32,
        task: F,
    ) -> Result<JoinHandle<F::Output>, WorkflowAlreadyInFlight>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.try_begin(key, requester, priority)?;
        Ok(tokio::spawn(async move {
            guard.mark_running();
            let output = task.await;
            drop(guard);
            output
        }))
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of in-flight workflows, oldest first.
    pub fn entries(&self) -> Vec<WorkflowEntry> {
        let mut entries: Vec<WorkflowEntry> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by_key(|entry| entry.started_at);
        entries
    }
}

/// Holds a workflow key; dropping it releases the key.
#[derive(Debug)]
pub struct WorkflowGuard {
    tracker: Arc<WorkflowTracker>,
    key: String,
}

impl WorkflowGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mark_running(&self) {
        if let Some(mut entry) = self.tracker.entries.get_mut(&self.key) {
            entry.status = WorkflowStatus::Running;
        }
    }
}

impl Drop for WorkflowGuard {
    fn drop(&mut self) {
        self.tracker.entries.remove(&self.key);
        metrics::record_workflows_in_flight(self.tracker.len());
    }
}
