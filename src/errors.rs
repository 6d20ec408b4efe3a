// Error taxonomy shared by the registry, tracker, monitor and recovery ladder

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One path that could not be locked because somebody else holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConflict {
    pub file_path: String,
    pub owner: String,
}

impl std::fmt::Display for LockConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (held by {})", self.file_path, self.owner)
    }
}

/// Entity kinds reported by `CoordinationError::NotFound`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Employee,
    Request,
    Task,
    Worker,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Employee => "employee",
            EntityKind::Request => "request",
            EntityKind::Task => "task",
            EntityKind::Worker => "worker",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {}", format_conflicts(.blocking, .message))]
    Conflict {
        message: String,
        blocking: Vec<LockConflict>,
    },

    #[error("Unknown {kind}: {key}")]
    NotFound { kind: EntityKind, key: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Incomplete status snapshot for {employee}: {reason}")]
    AnomalyData { employee: String, reason: String },

    #[error("Worker error: {0}")]
    Worker(String),
}

fn format_conflicts(blocking: &[LockConflict], message: &str) -> String {
    if blocking.is_empty() {
        return message.to_string();
    }
    let held: Vec<String> = blocking.iter().map(ToString::to_string).collect();
    format!("{message}: {}", held.join(", "))
}

impl CoordinationError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoordinationError::Validation(message.into())
    }

    pub fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        CoordinationError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn locked_by(blocking: Vec<LockConflict>) -> Self {
        CoordinationError::Conflict {
            message: "files already locked".to_string(),
            blocking,
        }
    }

    pub fn task_conflict(employee: &str) -> Self {
        CoordinationError::Conflict {
            message: format!("{employee} already has an active task"),
            blocking: Vec::new(),
        }
    }

    /// Only store failures are transient; everything else is a caller bug or a state clash
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinationError::Store(_))
    }

    /// Owners blocking a lock attempt, empty for non-lock conflicts
    pub fn blocking_owners(&self) -> Vec<&str> {
        match self {
            CoordinationError::Conflict { blocking, .. } => {
                let mut owners: Vec<&str> = blocking.iter().map(|c| c.owner.as_str()).collect();
                owners.sort_unstable();
                owners.dedup();
                owners
            }
            _ => Vec::new(),
        }
    }
}

impl From<std::io::Error> for CoordinationError {
    fn from(err: std::io::Error) -> Self {
        CoordinationError::Store(format!("IO error: {err}"))
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::Store(format!("Serialization error: {err}"))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for CoordinationError {
    fn from(err: sqlx::Error) -> Self {
        CoordinationError::Store(format!("Database error: {err}"))
    }
}

pub type Result<T, E = CoordinationError> = std::result::Result<T, E>;
