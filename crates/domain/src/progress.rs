use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{StageType, TaskStatus};

/// One event on a task's progress stream.
///
/// Events for a task are delivered to each subscriber in publish order;
/// late subscribers receive the latest snapshot first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageType>,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Progress,
    Completed,
    Error,
}

impl ProgressEvent {
    pub fn progress(task_id: Uuid, status: TaskStatus, stage: StageType, progress: u8) -> Self {
        Self {
            kind: ProgressKind::Progress,
            task_id,
            status,
            stage: Some(stage),
            progress,
            message: None,
        }
    }

    pub fn completed(task_id: Uuid) -> Self {
        Self {
            kind: ProgressKind::Completed,
            task_id,
            status: TaskStatus::Completed,
            stage: None,
            progress: 100,
            message: None,
        }
    }

    pub fn error(task_id: Uuid, progress: u8, message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Error,
            task_id,
            status: TaskStatus::Failed,
            stage: None,
            progress,
            message: Some(message.into()),
        }
    }

    /// Terminal events close the stream after delivery.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, ProgressKind::Progress)
    }
}
