// Rows and events owned by the file ownership registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker identity that can hold file locks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub name: String,
    pub role: String,
    /// Capability/cost level, higher is more capable
    pub tier: u8,
    pub hired_at: DateTime<Utc>,
}

/// Exclusive claim by one employee on one file path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLock {
    pub id: u64,
    pub file_path: String,
    pub owner: String,
    pub description: String,
    pub locked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Denied => "denied",
        };
        f.write_str(label)
    }
}

/// Ask the current owner of a locked file to hand it over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    pub id: u64,
    pub requester: String,
    pub file_path: String,
    /// Owner at the time the request was filed
    pub owner: String,
    pub reason: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
}

impl FileRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Result of a batch lock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOutcome {
    /// Locks created by this call
    pub acquired: Vec<FileLock>,
    /// Paths the caller already owned before the call
    pub already_held: Vec<String>,
}

impl LockOutcome {
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .acquired
            .iter()
            .map(|lock| lock.file_path.clone())
            .chain(self.already_held.iter().cloned())
            .collect();
        paths.sort();
        paths
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOutcome {
    /// The path was free (or already ours) and is now locked by the requester
    Granted(FileLock),
    /// The path is held by someone else; the owner must approve or deny
    Pending(FileRequest),
}

/// Domain events published after every committed ownership change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipEvent {
    OwnerChanged {
        file_path: String,
        from: Option<String>,
        to: Option<String>,
        at: DateTime<Utc>,
    },
    RequestOpened(FileRequest),
    RequestResolved(FileRequest),
}
