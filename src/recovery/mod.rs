//! Agent Recovery Manager
//!
//! Consumes monitor signals and climbs a bounded ladder per employee:
//! the first attempt nudges the worker, later attempts restart it, and once
//! `max_attempts` attempts have failed the task is escalated to a human.
//! After escalation nothing automatic happens for that employee until
//! `clear_escalation`. A condition that persists across polls advances the
//! ladder as soon as the recovery cool-down allows, independent of the
//! monitor's anomaly cool-down.

pub mod notifier;
pub mod types;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::errors::{CoordinationError, EntityKind, Result};
use crate::health::{AgentHealthMonitor, AnomalyEvent, MonitorSignal};
use crate::notify::NotificationChannel;
use crate::progress::{TaskProgressTracker, TaskStatus};
use crate::worker::{WorkerHandle, WorkerLauncher, WorkerTask};

pub use notifier::EscalationNotifier;
pub use types::{Escalation, RecoveryAction, RecoveryConfig, RecoveryKind, RecoveryOutcome};

#[derive(Debug, Default)]
struct Ladder {
    attempts: u32,
    last_attempt_at: Option<DateTime<Utc>>,
    pending: Option<RecoveryAction>,
    healthy_since: Option<DateTime<Utc>>,
    escalated: bool,
    /// The old worker was stopped by a restart that never replaced it
    worker_stopped: bool,
}

struct RestartTask {
    task: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

impl RestartTask {
    /// Ask the restart to stand down and wait until it has
    async fn stop(self) {
        self.cancel.send_replace(true);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!(error = %e, "Restart task panicked");
            }
        }
    }
}

struct RecoveryInner {
    tracker: Arc<TaskProgressTracker>,
    monitor: Arc<AgentHealthMonitor>,
    launcher: Arc<dyn WorkerLauncher>,
    channel: Arc<dyn NotificationChannel>,
    clock: Arc<dyn Clock>,
    config: RecoveryConfig,
    ladders: Mutex<HashMap<String, Ladder>>,
    log: Mutex<Vec<RecoveryAction>>,
    escalations: mpsc::UnboundedSender<Escalation>,
}

pub struct AgentRecoveryManager {
    inner: Arc<RecoveryInner>,
    restarts: Mutex<HashMap<String, RestartTask>>,
}

impl AgentRecoveryManager {
    /// Build a manager and the receiving end of its escalation channel
    pub fn new(
        tracker: Arc<TaskProgressTracker>,
        monitor: Arc<AgentHealthMonitor>,
        launcher: Arc<dyn WorkerLauncher>,
        channel: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
        config: RecoveryConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Escalation>) {
        let (escalations, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(RecoveryInner {
                tracker,
                monitor,
                launcher,
                channel,
                clock,
                config,
                ladders: Mutex::new(HashMap::new()),
                log: Mutex::new(Vec::new()),
                escalations,
            }),
            restarts: Mutex::new(HashMap::new()),
        };
        (manager, receiver)
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    /// React to one monitor signal; returns the action issued, if any
    pub async fn handle_signal(&self, signal: MonitorSignal) -> Option<RecoveryAction> {
        match signal {
            MonitorSignal::Anomaly(event) | MonitorSignal::Persisting(event) => self.handle_anomaly(event).await,
            MonitorSignal::Healthy { employee, at } => {
                self.inner.mark_healthy(&employee, at).await;
                None
            }
        }
    }

    async fn handle_anomaly(&self, event: AnomalyEvent) -> Option<RecoveryAction> {
        if !event.kind.triggers_recovery() {
            return None;
        }
        let inner = &self.inner;
        let now = inner.clock.now();

        let (kind, attempt) = {
            let mut ladders = inner.ladders.lock().await;
            let ladder = ladders.entry(event.employee.clone()).or_default();

            if ladder.escalated {
                debug!(employee = %event.employee, "Escalated, no automatic recovery");
                return None;
            }
            if let Some(since) = ladder.healthy_since.take() {
                if now - since >= inner.config.ladder_reset() {
                    debug!(employee = %event.employee, "Healthy long enough, ladder reset");
                    ladder.attempts = 0;
                }
            }
            if let Some(last) = ladder.last_attempt_at {
                if now - last < inner.config.cooldown() {
                    debug!(employee = %event.employee, kind = %event.kind, "Recovery rate-limited");
                    return None;
                }
            }
            if let Some(pending) = ladder.pending.take() {
                inner
                    .append_outcome(pending, RecoveryOutcome::Failed, Some(format!("{} persisted", event.kind)), now)
                    .await;
            }

            ladder.attempts += 1;
            ladder.last_attempt_at = Some(now);
            let kind = if ladder.attempts > inner.config.max_attempts {
                ladder.escalated = true;
                RecoveryKind::Escalate
            } else if ladder.attempts == 1 {
                RecoveryKind::Nudge
            } else {
                RecoveryKind::Restart
            };
            (kind, ladder.attempts)
        };

        let action = RecoveryAction {
            employee: event.employee.clone(),
            action: kind,
            attempt_number: attempt,
            outcome: RecoveryOutcome::Pending,
            anomaly: event.kind,
            note: None,
            timestamp: now,
        };
        info!(
            employee = %event.employee,
            kind = %event.kind,
            action = %kind,
            attempt,
            "Recovery action issued"
        );
        inner.log.lock().await.push(action.clone());
        if kind != RecoveryKind::Escalate {
            if let Some(ladder) = inner.ladders.lock().await.get_mut(&event.employee) {
                ladder.pending = Some(action.clone());
            }
        }

        match kind {
            RecoveryKind::Nudge => {
                inner.set_status(&event.employee, TaskStatus::Stuck).await;
                if let Err(e) = inner.nudge(&event).await {
                    warn!(employee = %event.employee, error = %e, "Nudge could not be delivered");
                    inner.resolve_pending(&event.employee, RecoveryOutcome::Failed, Some(e.to_string())).await;
                }
            }
            RecoveryKind::Restart => {
                inner.set_status(&event.employee, TaskStatus::Stuck).await;
                self.spawn_restart(event).await;
            }
            RecoveryKind::Escalate => {
                inner
                    .escalate(&event, attempt - 1, "recovery attempts exhausted".to_string())
                    .await;
            }
        }
        Some(action)
    }

    async fn spawn_restart(&self, event: AnomalyEvent) {
        let previous = self.restarts.lock().await.remove(&event.employee);
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let inner = self.inner.clone();
        let employee = event.employee.clone();
        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(async move {
            match inner.restart(&event.employee, &cancelled).await {
                Ok(()) => {}
                Err(e) if *cancelled.borrow() => {
                    debug!(employee = %event.employee, error = %e, "Restart stood down");
                }
                Err(e) => {
                    error!(employee = %event.employee, error = %e, "Restart failed, escalating");
                    inner
                        .resolve_pending(&event.employee, RecoveryOutcome::Failed, Some(e.to_string()))
                        .await;
                    let attempts = inner.attempts(&event.employee).await;
                    inner.mark_escalated(&event.employee).await;
                    inner.escalate(&event, attempts, format!("restart failed: {e}")).await;
                }
            }
        });
        self.restarts.lock().await.insert(employee, RestartTask { task, cancel });
    }

    /// Wait for every in-flight restart to finish
    pub async fn settle(&self) {
        let tasks: Vec<RestartTask> = self.restarts.lock().await.drain().map(|(_, task)| task).collect();
        for restart in tasks {
            if let Err(e) = restart.task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Restart task panicked");
                }
            }
        }
    }

    /// Drop all recovery state for `employee`; a restart in flight stands
    /// down and stops any worker it already launched before this returns
    pub async fn cancel(&self, employee: &str) {
        let restart = self.restarts.lock().await.remove(employee);
        if let Some(restart) = restart {
            restart.stop().await;
            debug!(employee = %employee, "In-flight restart cancelled");
        }
        self.inner.ladders.lock().await.remove(employee);
    }

    /// Manual intervention: reset the ladder and resume monitoring.
    ///
    /// When the escalation came from a restart that stopped the old worker
    /// but could not launch a new one, a fresh worker is launched first; if
    /// that fails the employee stays escalated.
    pub async fn clear_escalation(&self, employee: &str) -> Result<()> {
        let worker_stopped = match self.inner.ladders.lock().await.get(employee) {
            Some(ladder) if ladder.escalated => ladder.worker_stopped,
            _ => return Err(CoordinationError::validation(format!("{employee} is not escalated"))),
        };
        if worker_stopped {
            self.inner.relaunch(employee).await?;
        }
        if let Some(ladder) = self.inner.ladders.lock().await.get_mut(employee) {
            *ladder = Ladder::default();
        }

        self.inner.tracker.set_status(employee, TaskStatus::Running).await?;
        if let Err(e) = self.inner.monitor.clear(employee).await {
            warn!(employee = %employee, error = %e, "Monitor had no watch to clear");
        }
        info!(employee = %employee, "Escalation cleared, automatic recovery resumed");
        Ok(())
    }

    pub async fn attempts(&self, employee: &str) -> u32 {
        self.inner.attempts(employee).await
    }

    pub async fn is_escalated(&self, employee: &str) -> bool {
        self.inner
            .ladders
            .lock()
            .await
            .get(employee)
            .is_some_and(|ladder| ladder.escalated)
    }

    /// Every logged action and outcome, oldest first
    pub async fn recovery_log(&self) -> Vec<RecoveryAction> {
        self.inner.log.lock().await.clone()
    }

    pub async fn recovery_log_for(&self, employee: &str) -> Vec<RecoveryAction> {
        self.inner
            .log
            .lock()
            .await
            .iter()
            .filter(|action| action.employee == employee)
            .cloned()
            .collect()
    }

    /// Consume monitor signals until the channel closes or shutdown is requested
    pub async fn run(&self, mut signals: mpsc::UnboundedReceiver<MonitorSignal>, mut shutdown: watch::Receiver<bool>) {
        info!("Recovery manager started");
        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        self.handle_signal(signal).await;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Recovery manager stopped");
    }
}

impl RecoveryInner {
    async fn attempts(&self, employee: &str) -> u32 {
        self.ladders
            .lock()
            .await
            .get(employee)
            .map(|ladder| ladder.attempts)
            .unwrap_or(0)
    }

    async fn mark_escalated(&self, employee: &str) {
        if let Some(ladder) = self.ladders.lock().await.get_mut(employee) {
            ladder.escalated = true;
        }
    }

    async fn set_worker_stopped(&self, employee: &str, stopped: bool) {
        if let Some(ladder) = self.ladders.lock().await.get_mut(employee) {
            ladder.worker_stopped = stopped;
        }
    }

    async fn append_outcome(
        &self,
        mut action: RecoveryAction,
        outcome: RecoveryOutcome,
        note: Option<String>,
        at: DateTime<Utc>,
    ) {
        action.outcome = outcome;
        action.note = note;
        action.timestamp = at;
        debug!(
            employee = %action.employee,
            action = %action.action,
            attempt = action.attempt_number,
            outcome = %outcome,
            "Recovery outcome recorded"
        );
        self.log.lock().await.push(action);
    }

    async fn resolve_pending(&self, employee: &str, outcome: RecoveryOutcome, note: Option<String>) {
        let pending = self
            .ladders
            .lock()
            .await
            .get_mut(employee)
            .and_then(|ladder| ladder.pending.take());
        if let Some(action) = pending {
            self.append_outcome(action, outcome, note, self.clock.now()).await;
        }
    }

    async fn mark_healthy(&self, employee: &str, at: DateTime<Utc>) {
        let pending = {
            let mut ladders = self.ladders.lock().await;
            let Some(ladder) = ladders.get_mut(employee) else {
                return;
            };
            if ladder.escalated {
                return;
            }
            ladder.healthy_since.get_or_insert(at);
            ladder.pending.take()
        };
        if let Some(action) = pending {
            info!(employee = %employee, action = %action.action, "Recovery action resolved");
            self.append_outcome(action, RecoveryOutcome::Resolved, None, at).await;
        }
        if let Ok(Some(record)) = self.tracker.get(employee).await {
            if record.status == TaskStatus::Stuck {
                self.set_status(employee, TaskStatus::Running).await;
            }
        }
    }

    async fn set_status(&self, employee: &str, status: TaskStatus) {
        if let Err(e) = self.tracker.set_status(employee, status).await {
            warn!(employee = %employee, status = %status, error = %e, "Could not update task status");
        }
    }

    async fn nudge(&self, event: &AnomalyEvent) -> Result<()> {
        let description = match self.tracker.get(&event.employee).await? {
            Some(record) => record.description,
            None => return Err(CoordinationError::not_found(EntityKind::Task, &event.employee)),
        };
        let text = format!(
            "@{}: {} ({}). Task: {}",
            event.employee, self.config.nudge_message, event.kind, description
        );
        self.channel.send(&text, Some(event.employee.clone())).await
    }

    /// Launch a fresh worker for the employee's active task
    async fn launch(&self, employee: &str) -> Result<WorkerHandle> {
        let record = self
            .tracker
            .get(employee)
            .await?
            .ok_or_else(|| CoordinationError::not_found(EntityKind::Task, employee))?;
        let task = WorkerTask {
            employee: employee.to_string(),
            description: record.description.clone(),
            files: record.file_paths(),
        };
        self.launcher.start(&task).await
    }

    /// Put `handle` under monitoring, stopping it if there is nothing to monitor
    async fn adopt(&self, employee: &str, handle: WorkerHandle) -> Result<()> {
        if let Err(e) = self.monitor.replace_handle(employee, handle.clone()).await {
            if let Err(stop_err) = self.launcher.stop(&handle).await {
                warn!(employee = %employee, worker_id = %handle.id, error = %stop_err, "Orphaned worker did not stop cleanly");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn restart(&self, employee: &str, cancelled: &watch::Receiver<bool>) -> Result<()> {
        if self.tracker.get(employee).await?.is_none() {
            return Err(CoordinationError::not_found(EntityKind::Task, employee));
        }
        let old = self
            .monitor
            .handle_of(employee)
            .await
            .ok_or_else(|| CoordinationError::not_found(EntityKind::Worker, employee))?;

        self.tracker.set_status(employee, TaskStatus::Restarting).await?;
        self.monitor.mark_restarting(employee).await?;

        if let Err(e) = self.launcher.stop(&old).await {
            warn!(employee = %employee, worker_id = %old.id, error = %e, "Old worker did not stop cleanly");
        }
        self.set_worker_stopped(employee, true).await;
        let handle = self.launch(employee).await?;
        if *cancelled.borrow() {
            if let Err(e) = self.launcher.stop(&handle).await {
                warn!(employee = %employee, worker_id = %handle.id, error = %e, "Cancelled restart left a worker running");
            }
            return Err(CoordinationError::Worker(format!("restart of {employee} was cancelled")));
        }
        info!(
            employee = %employee,
            old_worker = %old.id,
            new_worker = %handle.id,
            "Worker restarted"
        );
        self.adopt(employee, handle).await?;
        self.set_worker_stopped(employee, false).await;
        self.tracker.set_status(employee, TaskStatus::Running).await?;
        Ok(())
    }

    /// Replace a worker that a failed restart already stopped
    async fn relaunch(&self, employee: &str) -> Result<()> {
        let handle = self.launch(employee).await?;
        info!(employee = %employee, worker_id = %handle.id, "Worker relaunched after escalation");
        self.adopt(employee, handle).await?;
        self.set_worker_stopped(employee, false).await;
        Ok(())
    }

    async fn escalate(&self, event: &AnomalyEvent, attempts: u32, reason: String) {
        let now = self.clock.now();
        self.set_status(&event.employee, TaskStatus::Escalated).await;
        if let Err(e) = self.monitor.mark_escalated(&event.employee).await {
            debug!(employee = %event.employee, error = %e, "No monitor watch to escalate");
        }
        warn!(employee = %event.employee, attempts, reason = %reason, "Escalating to operator");

        let escalation = Escalation {
            employee: event.employee.clone(),
            anomaly: event.clone(),
            attempts,
            reason,
            escalated_at: now,
        };
        if self.escalations.send(escalation).is_err() {
            error!(employee = %event.employee, "Escalation notifier is gone, escalation only logged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::{AnomalyKind, MonitorConfig};
    use crate::notify::MockNotificationChannel;
    use crate::progress::SelfReportedProgress;
    use crate::store::MemoryStore;
    use crate::worker::{MockWorkerLauncher, WorkerStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    struct Harness {
        manager: AgentRecoveryManager,
        escalations: mpsc::UnboundedReceiver<Escalation>,
        tracker: Arc<TaskProgressTracker>,
        monitor: Arc<AgentHealthMonitor>,
        clock: ManualClock,
        starts: Arc<AtomicU32>,
    }

    fn event(clock: &ManualClock, kind: AnomalyKind) -> AnomalyEvent {
        AnomalyEvent {
            employee: "alice".to_string(),
            kind,
            evidence: "test".to_string(),
            detected_at: clock.now(),
        }
    }

    fn anomaly(clock: &ManualClock, kind: AnomalyKind) -> MonitorSignal {
        MonitorSignal::Anomaly(event(clock, kind))
    }

    fn handle(id: &str) -> WorkerHandle {
        WorkerHandle {
            id: id.to_string(),
            employee: "alice".to_string(),
            pid: None,
            started_at: Utc::now(),
        }
    }

    async fn harness(start_fails: bool) -> Harness {
        let starts = Arc::new(AtomicU32::new(0));
        let mut launcher = MockWorkerLauncher::new();
        launcher.expect_status().returning(|_| Ok(WorkerStatus::working()));
        launcher.expect_stop().returning(|_| Ok(()));
        let counter = starts.clone();
        launcher.expect_start().returning(move |task| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 2;
            if start_fails {
                return Err(CoordinationError::Worker("binary missing".to_string()));
            }
            Ok(WorkerHandle {
                id: format!("{}_{n}", task.employee),
                employee: task.employee.clone(),
                pid: None,
                started_at: Utc::now(),
            })
        });
        harness_with(Arc::new(launcher), starts).await
    }

    async fn harness_with(launcher: Arc<dyn WorkerLauncher>, starts: Arc<AtomicU32>) -> Harness {
        let clock = ManualClock::new();
        let tracker = Arc::new(TaskProgressTracker::new(Arc::new(MemoryStore::new()), Arc::new(clock.clone())));

        let (monitor, _signals) = AgentHealthMonitor::new(
            tracker.clone(),
            launcher.clone(),
            Arc::new(SelfReportedProgress),
            Arc::new(clock.clone()),
            MonitorConfig::default(),
        );
        let monitor = Arc::new(monitor);

        let mut channel = MockNotificationChannel::new();
        channel.expect_send().returning(|_, _| Ok(()));

        let (manager, escalations) = AgentRecoveryManager::new(
            tracker.clone(),
            monitor.clone(),
            launcher,
            Arc::new(channel),
            Arc::new(clock.clone()),
            RecoveryConfig::default(),
        );

        tracker.create("alice", "refactor", &["a.py".to_string()]).await.unwrap();
        tracker.mark_running("alice").await.unwrap();
        monitor.register("alice", handle("alice_1")).await;

        Harness {
            manager,
            escalations,
            tracker,
            monitor,
            clock,
            starts,
        }
    }

    /// Launcher whose `start` parks until the test releases it
    #[derive(Default)]
    struct GatedLauncher {
        entered: Notify,
        release: Notify,
        stopped: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl WorkerLauncher for GatedLauncher {
        async fn start(&self, task: &WorkerTask) -> Result<WorkerHandle> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(WorkerHandle {
                id: format!("{}_2", task.employee),
                employee: task.employee.clone(),
                pid: None,
                started_at: Utc::now(),
            })
        }

        async fn status(&self, _handle: &WorkerHandle) -> Result<WorkerStatus> {
            Ok(WorkerStatus::working())
        }

        async fn stop(&self, handle: &WorkerHandle) -> Result<()> {
            self.stopped.lock().unwrap().push(handle.id.clone());
            Ok(())
        }
    }

    fn issued(log: &[RecoveryAction]) -> Vec<RecoveryKind> {
        log.iter().filter(|a| a.is_issue()).map(|a| a.action).collect()
    }

    #[tokio::test]
    async fn test_ladder_climbs_nudge_restart_escalate() {
        let mut h = harness(false).await;

        for _ in 0..4 {
            h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::StuckState)).await;
            h.manager.settle().await;
            h.clock.advance_secs(300);
        }

        let log = h.manager.recovery_log().await;
        assert_eq!(
            issued(&log),
            vec![
                RecoveryKind::Nudge,
                RecoveryKind::Restart,
                RecoveryKind::Restart,
                RecoveryKind::Escalate
            ]
        );
        assert_eq!(h.starts.load(Ordering::SeqCst), 2);
        assert!(h.manager.is_escalated("alice").await);
        assert_eq!(h.tracker.get("alice").await.unwrap().unwrap().status, TaskStatus::Escalated);

        let escalation = h.escalations.try_recv().unwrap();
        assert_eq!(escalation.attempts, 3);

        // Nothing further until cleared
        assert!(h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::StuckState)).await.is_none());
        assert_eq!(issued(&h.manager.recovery_log().await).len(), 4);

        h.manager.clear_escalation("alice").await.unwrap();
        assert_eq!(h.manager.attempts("alice").await, 0);
        assert_eq!(h.tracker.get("alice").await.unwrap().unwrap().status, TaskStatus::Running);
        // The last restart replaced the worker, so clearing launches nothing
        assert_eq!(h.starts.load(Ordering::SeqCst), 2);
        let action = h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::StuckState)).await;
        assert_eq!(action.map(|a| a.action), Some(RecoveryKind::Nudge));
    }

    #[tokio::test]
    async fn test_persisting_condition_advances_after_recovery_cooldown() {
        let h = harness(false).await;
        let cooldown = h.manager.config().cooldown_secs as i64;

        let first = h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::ErrorState)).await;
        assert_eq!(first.map(|a| a.action), Some(RecoveryKind::Nudge));

        h.clock.advance_secs(cooldown / 2);
        let early = MonitorSignal::Persisting(event(&h.clock, AnomalyKind::ErrorState));
        assert!(h.manager.handle_signal(early).await.is_none());

        h.clock.advance_secs(cooldown / 2);
        let due = MonitorSignal::Persisting(event(&h.clock, AnomalyKind::ErrorState));
        let action = h.manager.handle_signal(due).await;
        h.manager.settle().await;
        assert_eq!(action.map(|a| a.action), Some(RecoveryKind::Restart));

        let log = h.manager.recovery_log_for("alice").await;
        assert_eq!(log[1].action, RecoveryKind::Nudge);
        assert_eq!(log[1].outcome, RecoveryOutcome::Failed);
    }

    #[tokio::test]
    async fn test_attempts_inside_cooldown_are_rate_limited() {
        let h = harness(false).await;
        assert!(h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::ErrorState)).await.is_some());
        h.clock.advance_secs(10);
        assert!(h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::StuckState)).await.is_none());
        assert_eq!(h.manager.attempts("alice").await, 1);
    }

    #[tokio::test]
    async fn test_healthy_signal_resolves_pending_action() {
        let h = harness(false).await;
        h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::ProgressStagnant)).await;
        assert_eq!(h.tracker.get("alice").await.unwrap().unwrap().status, TaskStatus::Stuck);

        h.manager
            .handle_signal(MonitorSignal::Healthy {
                employee: "alice".to_string(),
                at: h.clock.now(),
            })
            .await;

        let log = h.manager.recovery_log_for("alice").await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].outcome, RecoveryOutcome::Resolved);
        assert_eq!(h.tracker.get("alice").await.unwrap().unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_long_health_resets_the_ladder() {
        let h = harness(false).await;
        h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::StuckState)).await;
        h.manager
            .handle_signal(MonitorSignal::Healthy {
                employee: "alice".to_string(),
                at: h.clock.now(),
            })
            .await;

        h.clock.advance_secs(601);
        let action = h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::StuckState)).await;
        assert_eq!(action.map(|a| (a.action, a.attempt_number)), Some((RecoveryKind::Nudge, 1)));
    }

    #[tokio::test]
    async fn test_help_requests_never_trigger_recovery() {
        let h = harness(false).await;
        assert!(h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::HelpRequested)).await.is_none());
        assert!(h.manager.recovery_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_restart_escalates() {
        let mut h = harness(true).await;
        h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::ErrorState)).await;
        h.clock.advance_secs(120);
        h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::ErrorState)).await;
        h.manager.settle().await;

        assert!(h.manager.is_escalated("alice").await);
        let escalation = h.escalations.try_recv().unwrap();
        assert!(escalation.reason.starts_with("restart failed"));
        assert_eq!(h.tracker.get("alice").await.unwrap().unwrap().status, TaskStatus::Escalated);

        // The old worker is gone and no replacement can start
        assert!(h.manager.clear_escalation("alice").await.is_err());
        assert!(h.manager.is_escalated("alice").await);
    }

    #[tokio::test]
    async fn test_cancel_forgets_the_ladder() {
        let h = harness(false).await;
        h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::StuckState)).await;
        h.manager.cancel("alice").await;
        assert_eq!(h.manager.attempts("alice").await, 0);
        assert!(h.manager.clear_escalation("alice").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_during_restart_stops_the_new_worker() {
        let launcher = Arc::new(GatedLauncher::default());
        let h = harness_with(launcher.clone(), Arc::new(AtomicU32::new(0))).await;

        h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::ErrorState)).await;
        h.clock.advance_secs(60);
        let action = h.manager.handle_signal(anomaly(&h.clock, AnomalyKind::ErrorState)).await;
        assert_eq!(action.map(|a| a.action), Some(RecoveryKind::Restart));

        // The restart is parked inside `start`; cancel lands before it returns
        launcher.entered.notified().await;
        tokio::join!(h.manager.cancel("alice"), async {
            tokio::task::yield_now().await;
            launcher.release.notify_one();
        });

        assert_eq!(
            *launcher.stopped.lock().unwrap(),
            vec!["alice_1".to_string(), "alice_2".to_string()]
        );
        assert_eq!(h.monitor.handle_of("alice").await.unwrap().id, "alice_1");
        assert!(!h.manager.is_escalated("alice").await);
    }
}
