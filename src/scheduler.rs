//! Periodic job scheduling against an injectable clock
//!
//! One scheduler drives every recurring activity (health polling, event
//! pumps) instead of per-task timers. Jobs are checked with `due_jobs`, which
//! makes the timing logic testable by advancing a `ManualClock`.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

#[derive(Debug, Clone)]
struct ScheduledJob {
    id: JobId,
    name: String,
    interval: Duration,
    next_due: DateTime<Utc>,
}

pub struct PeriodicScheduler {
    clock: Arc<dyn Clock>,
    jobs: Vec<ScheduledJob>,
    next_id: u64,
}

impl PeriodicScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a job that is due immediately and then every `interval`
    pub fn every(&mut self, name: &str, interval: Duration) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.jobs.push(ScheduledJob {
            id,
            name: name.to_string(),
            interval,
            next_due: self.clock.now(),
        });
        tracing::debug!(job = name, interval_secs = interval.num_seconds(), "Scheduled periodic job");
        id
    }

    pub fn cancel(&mut self, id: JobId) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.id != id);
        before != self.jobs.len()
    }

    pub fn name_of(&self, id: JobId) -> Option<&str> {
        self.jobs
            .iter()
            .find(|job| job.id == id)
            .map(|job| job.name.as_str())
    }

    /// Jobs whose deadline has passed, rescheduled one interval ahead.
    ///
    /// A job that fell several intervals behind fires once, not once per
    /// missed interval.
    pub fn due_jobs(&mut self) -> Vec<JobId> {
        let now = self.clock.now();
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_due <= now {
                due.push(job.id);
                job.next_due += job.interval;
                if job.next_due <= now {
                    job.next_due = now + job.interval;
                }
            }
        }
        due
    }

    /// Time until the earliest job is due, zero if something is overdue
    pub fn until_next(&self) -> std::time::Duration {
        let now = self.clock.now();
        self.jobs
            .iter()
            .map(|job| job.next_due - now)
            .min()
            .map(|wait| wait.to_std().unwrap_or(std::time::Duration::ZERO))
            .unwrap_or(std::time::Duration::from_secs(1))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
