// Where the monitor gets its progress view from
//
// Self-reported progress trusts what workers push through the tracker.
// Monitor-inferred progress also counts a changing worker progress hint as
// activity, for workers that never report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use super::types::TaskRecord;
use crate::worker::WorkerStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSourceKind {
    #[default]
    SelfReported,
    MonitorInferred,
}

impl ProgressSourceKind {
    pub fn build(self) -> Box<dyn ProgressSource> {
        match self {
            ProgressSourceKind::SelfReported => Box::new(SelfReportedProgress),
            ProgressSourceKind::MonitorInferred => Box::new(MonitorInferredProgress::default()),
        }
    }
}

impl std::fmt::Display for ProgressSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressSourceKind::SelfReported => f.write_str("self_reported"),
            ProgressSourceKind::MonitorInferred => f.write_str("monitor_inferred"),
        }
    }
}

/// Progress as seen by one poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub overall_percent: f64,
    pub last_activity_at: DateTime<Utc>,
}

pub trait ProgressSource: Send + Sync {
    fn kind(&self) -> ProgressSourceKind;

    fn snapshot(&self, record: &TaskRecord, worker: &WorkerStatus, observed_at: DateTime<Utc>) -> ProgressSnapshot;

    /// Drop any per-employee memory once monitoring stops
    fn forget(&self, _employee: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SelfReportedProgress;

impl ProgressSource for SelfReportedProgress {
    fn kind(&self) -> ProgressSourceKind {
        ProgressSourceKind::SelfReported
    }

    fn snapshot(&self, record: &TaskRecord, _worker: &WorkerStatus, _observed_at: DateTime<Utc>) -> ProgressSnapshot {
        ProgressSnapshot {
            overall_percent: record.overall_percent,
            last_activity_at: record.last_progress_at(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ObservedHint {
    hint: f64,
    changed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MonitorInferredProgress {
    observed: Mutex<HashMap<String, ObservedHint>>,
}

impl ProgressSource for MonitorInferredProgress {
    fn kind(&self) -> ProgressSourceKind {
        ProgressSourceKind::MonitorInferred
    }

    fn snapshot(&self, record: &TaskRecord, worker: &WorkerStatus, observed_at: DateTime<Utc>) -> ProgressSnapshot {
        let reported = record.last_progress_at();
        let Some(hint) = worker.progress_hint else {
            return ProgressSnapshot {
                overall_percent: record.overall_percent,
                last_activity_at: reported,
            };
        };

        let mut observed = self.observed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = observed
            .entry(record.employee.clone())
            .or_insert(ObservedHint {
                hint,
                changed_at: observed_at,
            });
        if entry.hint != hint {
            entry.hint = hint;
            entry.changed_at = observed_at;
        }

        ProgressSnapshot {
            overall_percent: hint.clamp(0.0, 100.0).max(record.overall_percent),
            last_activity_at: entry.changed_at.max(reported),
        }
    }

    fn forget(&self, employee: &str) {
        self.observed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(employee);
    }
}
