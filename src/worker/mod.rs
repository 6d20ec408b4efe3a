//! Worker collaborator contract
//!
//! A worker is the opaque unit that actually performs a task. The core only
//! starts it, polls its status and stops it; it never looks inside.

pub mod process;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

pub use process::{ProcessWorkerConfig, ProcessWorkerLauncher};

/// What a worker is asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub employee: String,
    pub description: String,
    pub files: Vec<String>,
}

/// Opaque reference to a started worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub id: String,
    pub employee: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Working,
    Idle,
    Error,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Working => f.write_str("working"),
            WorkerState::Idle => f.write_str("idle"),
            WorkerState::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Free text from the worker, e.g. an error message
    pub detail: Option<String>,
    /// Pull-based progress estimate in [0, 100]
    pub progress_hint: Option<f64>,
}

impl WorkerStatus {
    pub fn working() -> Self {
        Self {
            state: WorkerState::Working,
            detail: None,
            progress_hint: None,
        }
    }

    pub fn idle() -> Self {
        Self {
            state: WorkerState::Idle,
            detail: None,
            progress_hint: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            state: WorkerState::Error,
            detail: Some(detail.into()),
            progress_hint: None,
        }
    }
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn start(&self, task: &WorkerTask) -> Result<WorkerHandle>;

    async fn status(&self, handle: &WorkerHandle) -> Result<WorkerStatus>;

    /// Stopping an already-stopped worker succeeds
    async fn stop(&self, handle: &WorkerHandle) -> Result<()>;
}
