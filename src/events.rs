//! Control-plane events
//!
//! Everything the core reports to the surrounding system goes through
//! [`ControlEvent`]. The serialized form (`action` tag, snake_case) is what
//! the CLI prints and what a UI bridge would forward.

use crate::grouping::GroupReport;
use crate::grouping::undo::UndoReport;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Terminal status of a build task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    Error,
}

/// Event emitted by the core
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlEvent {
    /// Folder-level build progress
    Progress { done: usize, total: usize },
    #[serde(rename_all = "camelCase")]
    BuildStarted { task_id: String },
    #[serde(rename_all = "camelCase")]
    BuildComplete {
        task_id: String,
        status: CompletionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    BuildStopped { task_id: String },
    GroupProgress { done: usize, total: usize },
    GroupResult {
        status: CompletionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        groups: Option<BTreeMap<String, Vec<String>>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    UndoProgress { done: usize, total: usize },
    UndoResult(UndoReport),
    FileClassified {
        filename: String,
        path: String,
        category: String,
    },
}

impl ControlEvent {
    pub fn group_success(report: &GroupReport) -> Self {
        ControlEvent::GroupResult {
            status: CompletionStatus::Success,
            groups: Some(report.groups.clone()),
            message: None,
        }
    }

    pub fn group_error(message: impl Into<String>) -> Self {
        ControlEvent::GroupResult {
            status: CompletionStatus::Error,
            groups: None,
            message: Some(message.into()),
        }
    }

    /// True for the events that end a build task
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControlEvent::BuildComplete { .. } | ControlEvent::BuildStopped { .. }
        )
    }
}

/// Sending half shared by everything that emits events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event; having no subscribers is not an error
    pub fn emit(&self, event: ControlEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
