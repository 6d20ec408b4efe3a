// Task records and progress signals owned by the progress tracker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Stuck,
    Restarting,
    Escalated,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Allowed non-terminal transitions; terminal ones go through complete/cancel
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if *self == next {
            return true;
        }
        match (self, next) {
            (_, Completed | Cancelled) => false,
            (Completed | Cancelled, _) => false,
            (Pending, Running) => true,
            (Running, Stuck | Restarting | Escalated) => true,
            (Stuck, Running | Restarting | Escalated) => true,
            (Restarting, Running | Stuck | Escalated) => true,
            (Escalated, Running) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Stuck => "stuck",
            TaskStatus::Restarting => "restarting",
            TaskStatus::Escalated => "escalated",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProgress {
    /// Completion in [0, 100], never decreasing within one task record
    pub percent: f64,
    pub note: String,
    pub last_update_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub employee: String,
    pub description: String,
    pub files: BTreeMap<String, FileProgress>,
    pub overall_percent: f64,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn file_paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// Most recent progress report across all files
    pub fn last_progress_at(&self) -> DateTime<Utc> {
        self.files
            .values()
            .map(|progress| progress.last_update_at)
            .max()
            .unwrap_or(self.created_at)
    }

    pub(crate) fn recompute_overall(&mut self) {
        if self.files.is_empty() {
            self.overall_percent = 0.0;
            return;
        }
        let total: f64 = self.files.values().map(|progress| progress.percent).sum();
        self.overall_percent = total / self.files.len() as f64;
    }
}

/// Result of a single file progress update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub record: TaskRecord,
    /// The file crossed into 100% with this update
    pub file_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// A file reached 100%; its lock can be handed back
    SuggestRelease { employee: String, file_path: String },
    StatusChanged {
        employee: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}
