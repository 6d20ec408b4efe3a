//! Task Progress Tracker
//!
//! Owns one active `TaskRecord` per employee plus the archive of finished
//! records. Per-file percentages never go backwards; the overall figure is
//! the plain mean of the file percentages.

pub mod source;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::errors::{CoordinationError, EntityKind, Result};
use crate::ownership::normalize_paths;
use crate::store::TransactionalStore;

pub use source::{
    MonitorInferredProgress, ProgressSnapshot, ProgressSource, ProgressSourceKind, SelfReportedProgress,
};
pub use types::{FileProgress, ProgressEvent, ProgressUpdate, TaskRecord, TaskStatus};

const EVENT_CAPACITY: usize = 256;

pub struct TaskProgressTracker {
    store: Arc<dyn TransactionalStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ProgressEvent>,
}

impl TaskProgressTracker {
    pub fn new(store: Arc<dyn TransactionalStore>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            clock,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }

    /// Start a fresh record with every file at 0%
    pub async fn create(&self, employee: &str, description: &str, files: &[String]) -> Result<TaskRecord> {
        if employee.trim().is_empty() {
            return Err(CoordinationError::validation("employee name must not be empty"));
        }
        let files = normalize_paths(files)?;
        let now = self.clock.now();
        let record = TaskRecord {
            employee: employee.to_string(),
            description: description.to_string(),
            files: files
                .into_iter()
                .map(|path| {
                    (
                        path,
                        FileProgress {
                            percent: 0.0,
                            note: String::new(),
                            last_update_at: now,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            overall_percent: 0.0,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let row = record.clone();
        self.store
            .transaction(move |tables| {
                if tables.tasks.contains_key(&row.employee) {
                    return Err(CoordinationError::task_conflict(&row.employee));
                }
                tables.tasks.insert(row.employee.clone(), row);
                Ok(())
            })
            .await?;

        info!(
            employee = %employee,
            files = record.files.len(),
            "Created task record"
        );
        Ok(record)
    }

    pub async fn update_file(&self, employee: &str, path: &str, percent: f64, note: &str) -> Result<ProgressUpdate> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(CoordinationError::validation(format!(
                "percent must be within [0, 100], got {percent}"
            )));
        }
        let path = crate::ownership::normalize_path(path)?;
        let now = self.clock.now();
        let owner = employee.to_string();
        let note = note.to_string();

        let (update, path) = self
            .store
            .transaction(move |tables| {
                let record = tables
                    .tasks
                    .get_mut(&owner)
                    .ok_or_else(|| CoordinationError::not_found(EntityKind::Task, &owner))?;
                let progress = record.files.get_mut(&path).ok_or_else(|| {
                    CoordinationError::validation(format!("{path} is not part of {owner}'s task"))
                })?;
                if percent < progress.percent {
                    return Err(CoordinationError::validation(format!(
                        "progress for {path} cannot go back from {} to {percent}",
                        progress.percent
                    )));
                }

                let file_completed = progress.percent < 100.0 && percent >= 100.0;
                progress.percent = percent;
                progress.note = note;
                progress.last_update_at = now;
                record.recompute_overall();
                record.updated_at = now;

                let update = ProgressUpdate {
                    record: record.clone(),
                    file_completed,
                };
                Ok((update, path))
            })
            .await?;

        debug!(
            employee = %employee,
            file_path = %path,
            overall_percent = update.record.overall_percent,
            "Recorded file progress"
        );
        if update.file_completed {
            info!(employee = %employee, file_path = %path, "File finished, suggesting release");
            self.publish(ProgressEvent::SuggestRelease {
                employee: employee.to_string(),
                file_path: path,
            });
        }
        Ok(update)
    }

    /// Move a non-terminal record to `status`
    pub async fn set_status(&self, employee: &str, status: TaskStatus) -> Result<TaskRecord> {
        if status.is_terminal() {
            return Err(CoordinationError::validation(
                "terminal states are reached through complete or cancel",
            ));
        }
        let now = self.clock.now();
        let owner = employee.to_string();
        let (record, previous) = self
            .store
            .transaction(move |tables| {
                let record = tables
                    .tasks
                    .get_mut(&owner)
                    .ok_or_else(|| CoordinationError::not_found(EntityKind::Task, &owner))?;
                let previous = record.status;
                if !previous.can_transition_to(status) {
                    return Err(CoordinationError::validation(format!(
                        "task for {owner} cannot move from {previous} to {status}"
                    )));
                }
                record.status = status;
                record.updated_at = now;
                Ok((record.clone(), previous))
            })
            .await?;

        if previous != status {
            info!(employee = %employee, from = %previous, to = %status, "Task status changed");
            self.publish(ProgressEvent::StatusChanged {
                employee: employee.to_string(),
                from: previous,
                to: status,
            });
        }
        Ok(record)
    }

    pub async fn mark_running(&self, employee: &str) -> Result<TaskRecord> {
        self.set_status(employee, TaskStatus::Running).await
    }

    pub async fn complete(&self, employee: &str) -> Result<TaskRecord> {
        self.finish(employee, TaskStatus::Completed).await
    }

    pub async fn cancel(&self, employee: &str) -> Result<TaskRecord> {
        self.finish(employee, TaskStatus::Cancelled).await
    }

    async fn finish(&self, employee: &str, terminal: TaskStatus) -> Result<TaskRecord> {
        let now = self.clock.now();
        let owner = employee.to_string();
        let record = self
            .store
            .transaction(move |tables| {
                let mut record = tables
                    .tasks
                    .remove(&owner)
                    .ok_or_else(|| CoordinationError::not_found(EntityKind::Task, &owner))?;
                record.status = terminal;
                record.updated_at = now;
                tables.task_history.push(record.clone());
                Ok(record)
            })
            .await?;

        info!(
            employee = %employee,
            status = %terminal,
            overall_percent = record.overall_percent,
            "Archived task record"
        );
        Ok(record)
    }

    pub async fn get(&self, employee: &str) -> Result<Option<TaskRecord>> {
        let owner = employee.to_string();
        self.store
            .read(move |tables| tables.tasks.get(&owner).cloned())
            .await
    }

    pub async fn list_active(&self) -> Result<Vec<TaskRecord>> {
        self.store
            .read(|tables| tables.tasks.values().cloned().collect())
            .await
    }

    /// Archived records for `employee`, oldest first
    pub async fn history(&self, employee: &str) -> Result<Vec<TaskRecord>> {
        let owner = employee.to_string();
        self.store
            .read(move |tables| {
                tables
                    .task_history
                    .iter()
                    .filter(|record| record.employee == owner)
                    .cloned()
                    .collect()
            })
            .await
    }
}
