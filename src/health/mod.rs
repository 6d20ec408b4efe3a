//! Agent Health Monitor
//!
//! Polls every registered worker on a fixed interval, folds the worker
//! status together with the tracker's progress view and classifies the
//! result. Classification precedence is ERROR_STATE, then STUCK_STATE, then
//! PROGRESS_STAGNANT; at most one condition is active per agent per poll.
//! Events are de-duplicated per (employee, kind) within the anomaly
//! cool-down and forwarded to the recovery manager over a channel. A
//! condition that is still active inside the cool-down is forwarded as
//! `Persisting` without being logged again.

pub mod state_machine;
pub mod types;

use chrono::{DateTime, Utc};
use statig::prelude::*;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::errors::{CoordinationError, EntityKind, Result};
use crate::progress::{ProgressSnapshot, ProgressSource, TaskProgressTracker, TaskRecord, TaskStatus};
use crate::scheduler::PeriodicScheduler;
use crate::worker::{WorkerHandle, WorkerLauncher, WorkerState, WorkerStatus};

pub use state_machine::{health_state, AgentHealthMachine, HealthEvent};
pub use types::{
    AgentHealth, AnomalyEvent, AnomalyKind, HealthState, HealthSummary, MonitorConfig, MonitorSignal, PollReport,
};

struct AgentWatch {
    handle: WorkerHandle,
    machine: StateMachine<AgentHealthMachine>,
    worker_state: Option<WorkerState>,
    worker_state_since: DateTime<Utc>,
    last_percent: Option<f64>,
    percent_since: DateTime<Utc>,
    overall_percent: f64,
    last_activity_at: DateTime<Utc>,
    last_checked_at: Option<DateTime<Utc>>,
    active: Option<AnomalyKind>,
    /// Set by a restart until the next poll settles the outcome
    recovering: bool,
    last_emitted: HashMap<AnomalyKind, DateTime<Utc>>,
}

impl AgentWatch {
    fn new(employee: &str, handle: WorkerHandle, now: DateTime<Utc>) -> Self {
        Self {
            handle,
            machine: AgentHealthMachine::new(employee.to_string()).state_machine(),
            worker_state: None,
            worker_state_since: now,
            last_percent: None,
            percent_since: now,
            overall_percent: 0.0,
            last_activity_at: now,
            last_checked_at: None,
            active: None,
            recovering: false,
            last_emitted: HashMap::new(),
        }
    }

    /// Forget observed history so detection starts over
    fn reset_observations(&mut self, now: DateTime<Utc>) {
        self.worker_state = None;
        self.worker_state_since = now;
        self.last_percent = None;
        self.percent_since = now;
        self.active = None;
    }

    fn state(&self) -> HealthState {
        health_state(&self.machine)
    }

    fn view(&self, employee: &str) -> AgentHealth {
        AgentHealth {
            employee: employee.to_string(),
            state: self.state(),
            worker_state: self.worker_state,
            overall_percent: self.overall_percent,
            last_activity_at: self.last_activity_at,
            last_checked_at: self.last_checked_at,
            active_anomalies: self.active.into_iter().collect(),
        }
    }

    /// Update observations and return the active condition, if any
    fn classify(
        &mut self,
        status: &WorkerStatus,
        snapshot: ProgressSnapshot,
        now: DateTime<Utc>,
        config: &MonitorConfig,
    ) -> Option<(AnomalyKind, String)> {
        if self.worker_state != Some(status.state) {
            self.worker_state = Some(status.state);
            self.worker_state_since = now;
        }
        if self.last_percent != Some(snapshot.overall_percent) {
            self.last_percent = Some(snapshot.overall_percent);
            self.percent_since = now;
        }
        self.overall_percent = snapshot.overall_percent;
        self.last_activity_at = snapshot.last_activity_at;
        self.last_checked_at = Some(now);

        if status.state == WorkerState::Error {
            let detail = status.detail.clone().unwrap_or_else(|| "worker reported an error".to_string());
            return Some((AnomalyKind::ErrorState, detail));
        }

        let unchanged_for = now - self.worker_state_since;
        let quiet_for = now - snapshot.last_activity_at;
        if unchanged_for > config.stuck_timeout() && quiet_for > config.stuck_timeout() {
            return Some((
                AnomalyKind::StuckState,
                format!(
                    "worker {} for {}s with no progress for {}s",
                    status.state,
                    unchanged_for.num_seconds(),
                    quiet_for.num_seconds()
                ),
            ));
        }

        let flat_for = now - self.percent_since;
        if status.state == WorkerState::Working && flat_for > config.stagnation_timeout() {
            return Some((
                AnomalyKind::ProgressStagnant,
                format!(
                    "progress held at {:.1}% for {}s while working",
                    snapshot.overall_percent,
                    flat_for.num_seconds()
                ),
            ));
        }

        None
    }

    /// Record an emission unless one of the same kind happened inside the cool-down
    fn should_emit(&mut self, kind: AnomalyKind, now: DateTime<Utc>, config: &MonitorConfig) -> bool {
        match self.last_emitted.get(&kind) {
            Some(last) if now - *last < config.anomaly_cooldown() => false,
            _ => {
                self.last_emitted.insert(kind, now);
                true
            }
        }
    }
}

pub struct AgentHealthMonitor {
    tracker: Arc<TaskProgressTracker>,
    launcher: Arc<dyn WorkerLauncher>,
    source: Arc<dyn ProgressSource>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    agents: Mutex<BTreeMap<String, AgentWatch>>,
    help_emitted: Mutex<HashMap<String, DateTime<Utc>>>,
    anomalies: Mutex<VecDeque<AnomalyEvent>>,
    signals: mpsc::UnboundedSender<MonitorSignal>,
}

impl AgentHealthMonitor {
    /// Build a monitor and the receiving end of its signal channel
    pub fn new(
        tracker: Arc<TaskProgressTracker>,
        launcher: Arc<dyn WorkerLauncher>,
        source: Arc<dyn ProgressSource>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MonitorSignal>) {
        let (signals, receiver) = mpsc::unbounded_channel();
        info!(
            poll_interval_secs = config.poll_interval_secs,
            stuck_timeout_secs = config.stuck_timeout_secs,
            stagnation_timeout_secs = config.stagnation_timeout_secs,
            progress_source = %source.kind(),
            "Health monitor configured"
        );
        let monitor = Self {
            tracker,
            launcher,
            source,
            clock,
            config,
            agents: Mutex::new(BTreeMap::new()),
            help_emitted: Mutex::new(HashMap::new()),
            anomalies: Mutex::new(VecDeque::new()),
            signals,
        };
        (monitor, receiver)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub async fn register(&self, employee: &str, handle: WorkerHandle) {
        let now = self.clock.now();
        let previous = self
            .agents
            .lock()
            .await
            .insert(employee.to_string(), AgentWatch::new(employee, handle, now));
        if previous.is_some() {
            warn!(employee = %employee, "Re-registered agent, previous watch discarded");
        } else {
            info!(employee = %employee, "Agent registered for health monitoring");
        }
    }

    /// Stop monitoring `employee`, returning its last worker handle
    pub async fn deregister(&self, employee: &str) -> Option<WorkerHandle> {
        let removed = self.agents.lock().await.remove(employee);
        self.source.forget(employee);
        if removed.is_some() {
            info!(employee = %employee, "Agent deregistered from health monitoring");
        }
        removed.map(|watch| watch.handle)
    }

    pub async fn is_registered(&self, employee: &str) -> bool {
        self.agents.lock().await.contains_key(employee)
    }

    pub async fn handle_of(&self, employee: &str) -> Option<WorkerHandle> {
        self.agents.lock().await.get(employee).map(|watch| watch.handle.clone())
    }

    pub async fn health_of(&self, employee: &str) -> Option<AgentHealth> {
        self.agents.lock().await.get(employee).map(|watch| watch.view(employee))
    }

    async fn drive(&self, employee: &str, event: HealthEvent) -> Result<HealthState> {
        let mut agents = self.agents.lock().await;
        let watch = agents
            .get_mut(employee)
            .ok_or_else(|| CoordinationError::not_found(EntityKind::Worker, employee))?;
        watch.machine.handle(&event);
        Ok(watch.state())
    }

    pub async fn mark_restarting(&self, employee: &str) -> Result<HealthState> {
        self.drive(employee, HealthEvent::RestartBegun).await
    }

    /// Swap in a relaunched worker and start detection from scratch
    pub async fn replace_handle(&self, employee: &str, handle: WorkerHandle) -> Result<HealthState> {
        let now = self.clock.now();
        let mut agents = self.agents.lock().await;
        let watch = agents
            .get_mut(employee)
            .ok_or_else(|| CoordinationError::not_found(EntityKind::Worker, employee))?;
        watch.handle = handle;
        watch.reset_observations(now);
        watch.recovering = true;
        watch.machine.handle(&HealthEvent::RestartFinished);
        self.source.forget(employee);
        debug!(employee = %employee, worker_id = %watch.handle.id, "Worker handle replaced");
        Ok(watch.state())
    }

    pub async fn mark_escalated(&self, employee: &str) -> Result<HealthState> {
        self.drive(employee, HealthEvent::Escalate).await
    }

    /// Manual clear after escalation; detection restarts from scratch
    pub async fn clear(&self, employee: &str) -> Result<HealthState> {
        let now = self.clock.now();
        let mut agents = self.agents.lock().await;
        let watch = agents
            .get_mut(employee)
            .ok_or_else(|| CoordinationError::not_found(EntityKind::Worker, employee))?;
        watch.reset_observations(now);
        watch.last_emitted.clear();
        watch.machine.handle(&HealthEvent::Clear);
        Ok(watch.state())
    }

    /// Log a HELP_REQUESTED anomaly; never forwarded to recovery
    pub async fn record_help_request(&self, employee: &str, text: &str) -> Option<AnomalyEvent> {
        let now = self.clock.now();
        {
            let mut emitted = self.help_emitted.lock().await;
            if let Some(last) = emitted.get(employee) {
                if now - *last < self.config.anomaly_cooldown() {
                    debug!(employee = %employee, "Help request inside cool-down, not logged again");
                    return None;
                }
            }
            emitted.insert(employee.to_string(), now);
        }

        let event = AnomalyEvent {
            employee: employee.to_string(),
            kind: AnomalyKind::HelpRequested,
            evidence: text.to_string(),
            detected_at: now,
        };
        info!(employee = %employee, kind = %event.kind, "Help requested");
        self.log_anomaly(event.clone()).await;
        Some(event)
    }

    async fn log_anomaly(&self, event: AnomalyEvent) {
        let mut log = self.anomalies.lock().await;
        if log.len() >= self.config.anomaly_log_capacity.max(1) {
            log.pop_front();
        }
        log.push_back(event);
    }

    /// Most recent anomalies, oldest first
    pub async fn recent_anomalies(&self, limit: usize) -> Vec<AnomalyEvent> {
        let log = self.anomalies.lock().await;
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }

    fn signal(&self, signal: MonitorSignal) {
        if self.signals.send(signal).is_err() {
            debug!("Recovery manager is gone, dropping monitor signal");
        }
    }

    /// Run one poll cycle over every registered agent
    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();

        let records: HashMap<String, TaskRecord> = match self.tracker.list_active().await {
            Ok(records) => records
                .into_iter()
                .map(|record| (record.employee.clone(), record))
                .collect(),
            Err(e) => {
                error!(error = %e, "Health poll failed, retrying next cycle");
                report.failure = Some(e.to_string());
                return report;
            }
        };

        let targets: Vec<(String, WorkerHandle)> = {
            let agents = self.agents.lock().await;
            agents
                .iter()
                .filter(|(_, watch)| matches!(watch.state(), HealthState::Running | HealthState::Stuck))
                .map(|(employee, watch)| (employee.clone(), watch.handle.clone()))
                .collect()
        };

        for (employee, handle) in targets {
            match self.poll_agent(&employee, &handle, records.get(&employee)).await {
                Ok(AgentPoll::Anomalous(Some(event))) => {
                    report.checked += 1;
                    report.anomalies.push(event);
                }
                Ok(AgentPoll::Anomalous(None)) | Ok(AgentPoll::Healthy) => report.checked += 1,
                Ok(AgentPoll::Recovered) => {
                    report.checked += 1;
                    report.recovered.push(employee);
                }
                Ok(AgentPoll::Gone) => {}
                Err(e) => {
                    warn!(employee = %employee, error = %e, "Skipping agent this cycle");
                    report.skipped.push((employee, e.to_string()));
                }
            }
        }

        if !report.anomalies.is_empty() || !report.skipped.is_empty() {
            info!(
                checked = report.checked,
                anomalies = report.anomalies.len(),
                skipped = report.skipped.len(),
                "Health poll finished"
            );
        }
        report
    }

    async fn poll_agent(&self, employee: &str, handle: &WorkerHandle, record: Option<&TaskRecord>) -> Result<AgentPoll> {
        let record = record.ok_or_else(|| CoordinationError::AnomalyData {
            employee: employee.to_string(),
            reason: "no active task record".to_string(),
        })?;
        if record.status == TaskStatus::Escalated {
            return Ok(AgentPoll::Healthy);
        }

        let status = match tokio::time::timeout(self.config.status_timeout(), self.launcher.status(handle)).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(CoordinationError::AnomalyData {
                    employee: employee.to_string(),
                    reason: format!("worker status unavailable: {e}"),
                })
            }
            Err(_) => {
                return Err(CoordinationError::AnomalyData {
                    employee: employee.to_string(),
                    reason: format!("worker status timed out after {}s", self.config.status_timeout_secs),
                })
            }
        };

        let now = self.clock.now();
        let snapshot = self.source.snapshot(record, &status, now);

        let mut agents = self.agents.lock().await;
        let Some(watch) = agents.get_mut(employee) else {
            return Ok(AgentPoll::Gone);
        };
        if watch.handle.id != handle.id || !matches!(watch.state(), HealthState::Running | HealthState::Stuck) {
            // Restarted or escalated while the status call was in flight
            return Ok(AgentPoll::Gone);
        }

        match watch.classify(&status, snapshot, now, &self.config) {
            Some((kind, evidence)) => {
                watch.active = Some(kind);
                watch.recovering = false;
                watch.machine.handle(&HealthEvent::AnomalyDetected(kind));
                let fresh = watch.should_emit(kind, now, &self.config);
                drop(agents);

                let event = AnomalyEvent {
                    employee: employee.to_string(),
                    kind,
                    evidence,
                    detected_at: now,
                };
                if !fresh {
                    debug!(employee = %employee, kind = %kind, "Anomaly persists inside cool-down");
                    self.signal(MonitorSignal::Persisting(event));
                    return Ok(AgentPoll::Anomalous(None));
                }
                warn!(employee = %employee, kind = %kind, evidence = %event.evidence, "Anomaly detected");
                self.log_anomaly(event.clone()).await;
                self.signal(MonitorSignal::Anomaly(event.clone()));
                Ok(AgentPoll::Anomalous(Some(event)))
            }
            None if watch.active.is_some() || watch.recovering || watch.state() == HealthState::Stuck => {
                watch.active = None;
                watch.recovering = false;
                watch.machine.handle(&HealthEvent::Recovered);
                drop(agents);

                info!(employee = %employee, "Agent healthy again");
                self.signal(MonitorSignal::Healthy {
                    employee: employee.to_string(),
                    at: now,
                });
                Ok(AgentPoll::Recovered)
            }
            None => Ok(AgentPoll::Healthy),
        }
    }

    pub async fn summary(&self) -> HealthSummary {
        let agents = self.agents.lock().await;
        let views = agents.iter().map(|(employee, watch)| watch.view(employee)).collect();
        HealthSummary::from_agents(self.clock.now(), views)
    }

    /// Poll on the configured interval until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut scheduler = PeriodicScheduler::new(self.clock.clone());
        let poll_job = scheduler.every("health-poll", self.config.poll_interval());
        info!("Health monitor started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            for job in scheduler.due_jobs() {
                if job == poll_job {
                    self.poll_once().await;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(scheduler.until_next()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Health monitor stopped");
    }
}

enum AgentPoll {
    Healthy,
    /// Condition active; the event is `None` when the cool-down suppressed it
    Anomalous(Option<AnomalyEvent>),
    Recovered,
    Gone,
}
