//! Coordination Bridge
//!
//! Top-level glue between external directives and the coordination core.
//! An assignment locks the files, opens the task record, launches the worker
//! and registers it for health monitoring, unwinding earlier steps when a
//! later one fails. Completion and cancellation tear the same state down.
//! Store calls made here are retried with backoff before anything unwinds.

pub mod directive;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::clock::Clock;
use crate::config::WardenConfig;
use crate::errors::{CoordinationError, EntityKind, Result};
use crate::health::{AgentHealthMonitor, AnomalyEvent, HealthSummary, MonitorSignal};
use crate::notify::{Mention, NotificationChannel};
use crate::ownership::{Dismissal, FileOwnershipRegistry, LockOutcome, OwnershipEvent};
use crate::progress::{ProgressEvent, ProgressUpdate, TaskProgressTracker, TaskRecord};
use crate::recovery::{AgentRecoveryManager, Escalation, RecoveryAction};
use crate::store::{StoreRetry, TransactionalStore};
use crate::telemetry::{create_coordination_span, generate_correlation_id};
use crate::worker::{WorkerHandle, WorkerLauncher, WorkerTask};

pub use directive::Directive;

/// Everything a successful assignment produced
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub record: TaskRecord,
    pub handle: WorkerHandle,
    pub locks: LockOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveOutcome {
    Assigned(Assignment),
    Completed(TaskRecord),
    Cancelled(TaskRecord),
    HelpForwarded(Option<AnomalyEvent>),
}

impl DirectiveOutcome {
    pub fn describe(&self) -> String {
        match self {
            DirectiveOutcome::Assigned(assignment) => format!(
                "{} is working on '{}' ({} files)",
                assignment.record.employee,
                assignment.record.description,
                assignment.record.files.len()
            ),
            DirectiveOutcome::Completed(record) => format!("{}'s task is complete", record.employee),
            DirectiveOutcome::Cancelled(record) => format!("{}'s task was cancelled", record.employee),
            DirectiveOutcome::HelpForwarded(_) => "help request forwarded".to_string(),
        }
    }
}

/// Result of draining pending registry and tracker events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDrain {
    /// (employee, path) pairs released after the file reached 100%
    pub released: Vec<(String, String)>,
    pub owner_changes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub summary: HealthSummary,
    pub recent_anomalies: Vec<AnomalyEvent>,
    pub recovery_log: Vec<RecoveryAction>,
}

struct EventStreams {
    progress: broadcast::Receiver<ProgressEvent>,
    ownership: broadcast::Receiver<OwnershipEvent>,
}

/// Fully wired service graph plus the channels its background loops consume
pub struct WardenRuntime {
    pub bridge: Arc<CoordinationBridge>,
    pub signals: mpsc::UnboundedReceiver<MonitorSignal>,
    pub escalations: mpsc::UnboundedReceiver<Escalation>,
}

pub struct CoordinationBridge {
    registry: Arc<FileOwnershipRegistry>,
    tracker: Arc<TaskProgressTracker>,
    monitor: Arc<AgentHealthMonitor>,
    recovery: Arc<AgentRecoveryManager>,
    launcher: Arc<dyn WorkerLauncher>,
    channel: Arc<dyn NotificationChannel>,
    retry: StoreRetry,
    streams: Mutex<Option<EventStreams>>,
    ledger: Mutex<BTreeMap<String, String>>,
}

impl CoordinationBridge {
    pub fn new(
        registry: Arc<FileOwnershipRegistry>,
        tracker: Arc<TaskProgressTracker>,
        monitor: Arc<AgentHealthMonitor>,
        recovery: Arc<AgentRecoveryManager>,
        launcher: Arc<dyn WorkerLauncher>,
        channel: Arc<dyn NotificationChannel>,
        retry: StoreRetry,
    ) -> Self {
        let streams = EventStreams {
            progress: tracker.subscribe(),
            ownership: registry.subscribe(),
        };
        Self {
            registry,
            tracker,
            monitor,
            recovery,
            launcher,
            channel,
            retry,
            streams: Mutex::new(Some(streams)),
            ledger: Mutex::new(BTreeMap::new()),
        }
    }

    /// Wire registry, tracker, monitor, recovery and bridge over one store
    pub fn assemble(
        config: &WardenConfig,
        store: Arc<dyn TransactionalStore>,
        launcher: Arc<dyn WorkerLauncher>,
        channel: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
    ) -> WardenRuntime {
        let registry = Arc::new(FileOwnershipRegistry::new(store.clone(), clock.clone()));
        let tracker = Arc::new(TaskProgressTracker::new(store, clock.clone()));
        let (monitor, signals) = AgentHealthMonitor::new(
            tracker.clone(),
            launcher.clone(),
            Arc::from(config.progress_source.build()),
            clock.clone(),
            config.monitor.clone(),
        );
        let monitor = Arc::new(monitor);
        let (recovery, escalations) = AgentRecoveryManager::new(
            tracker.clone(),
            monitor.clone(),
            launcher.clone(),
            channel.clone(),
            clock,
            config.recovery.clone(),
        );
        let retry = StoreRetry::new(config.store.retry.clone());
        let bridge = Self::new(registry, tracker, monitor, Arc::new(recovery), launcher, channel, retry);
        WardenRuntime {
            bridge: Arc::new(bridge),
            signals,
            escalations,
        }
    }

    pub fn registry(&self) -> &Arc<FileOwnershipRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<TaskProgressTracker> {
        &self.tracker
    }

    pub fn monitor(&self) -> &Arc<AgentHealthMonitor> {
        &self.monitor
    }

    pub fn recovery(&self) -> &Arc<AgentRecoveryManager> {
        &self.recovery
    }

    /// Lock files, open the task record, launch the worker, start monitoring
    pub async fn assign(&self, employee: &str, description: &str, files: &[String]) -> Result<Assignment> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("assign", Some(employee), Some(&correlation_id));
        self.assign_inner(employee, description, files).instrument(span).await
    }

    async fn assign_inner(&self, employee: &str, description: &str, files: &[String]) -> Result<Assignment> {
        let locks = self
            .retry
            .run("lock files", || self.registry.lock(employee, files, description))
            .await?;
        let acquired = locks.acquired.iter().map(|lock| lock.file_path.clone()).collect::<Vec<_>>();
        let paths = locks.paths();

        let record = match self
            .retry
            .run("create task", || self.tracker.create(employee, description, &paths))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.unwind_locks(employee, &acquired).await;
                return Err(e);
            }
        };

        let task = WorkerTask {
            employee: employee.to_string(),
            description: description.to_string(),
            files: record.file_paths(),
        };
        let handle = match self.launcher.start(&task).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(employee = %employee, error = %e, "Worker launch failed, unwinding assignment");
                self.unwind_task(employee).await;
                self.unwind_locks(employee, &acquired).await;
                return Err(e);
            }
        };

        let record = match self.retry.run("mark task running", || self.tracker.mark_running(employee)).await {
            Ok(record) => record,
            Err(e) => {
                error!(employee = %employee, error = %e, "Task could not start, unwinding assignment");
                self.stop_worker(employee, &handle).await;
                self.unwind_task(employee).await;
                self.unwind_locks(employee, &acquired).await;
                return Err(e);
            }
        };
        self.monitor.register(employee, handle.clone()).await;

        info!(
            employee = %employee,
            worker_id = %handle.id,
            files = record.files.len(),
            "Task assigned"
        );
        Ok(Assignment { record, handle, locks })
    }

    async fn unwind_task(&self, employee: &str) {
        if let Err(e) = self.retry.run("cancel task", || self.tracker.cancel(employee)).await {
            error!(employee = %employee, error = %e, "Could not cancel task record while unwinding");
        }
    }

    async fn unwind_locks(&self, employee: &str, acquired: &[String]) {
        if acquired.is_empty() {
            return;
        }
        if let Err(e) = self
            .retry
            .run("release locks", || self.registry.release(employee, Some(acquired)))
            .await
        {
            error!(employee = %employee, files = ?acquired, error = %e, "Failed to release locks while unwinding");
        }
    }

    async fn stop_worker(&self, employee: &str, handle: &WorkerHandle) {
        if let Err(e) = self.launcher.stop(handle).await {
            warn!(employee = %employee, worker_id = %handle.id, error = %e, "Worker did not stop cleanly");
        }
    }

    pub async fn report_progress(&self, employee: &str, path: &str, percent: f64, note: &str) -> Result<ProgressUpdate> {
        self.tracker.update_file(employee, path, percent, note).await
    }

    /// Forward a help request to every peer and log it as HELP_REQUESTED
    pub async fn request_help(&self, employee: &str, text: &str) -> Result<Option<AnomalyEvent>> {
        self.registry.get_employee(employee).await?;
        let peers: Vec<String> = self
            .registry
            .list_employees()
            .await?
            .into_iter()
            .map(|peer| peer.name)
            .filter(|name| name != employee)
            .collect();

        let event = self.monitor.record_help_request(employee, text).await;

        let message = format!("{employee} needs help: {text}");
        if peers.is_empty() {
            self.channel.send(&message, None).await?;
        }
        for peer in &peers {
            if let Err(e) = self.channel.send(&message, Some(peer.clone())).await {
                warn!(employee = %employee, peer = %peer, error = %e, "Could not forward help request");
            }
        }
        debug!(employee = %employee, peers = peers.len(), "Help request forwarded");
        Ok(event)
    }

    pub async fn complete(&self, employee: &str) -> Result<TaskRecord> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("complete", Some(employee), Some(&correlation_id));
        self.teardown(employee, true).instrument(span).await
    }

    pub async fn cancel(&self, employee: &str) -> Result<TaskRecord> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("cancel", Some(employee), Some(&correlation_id));
        self.teardown(employee, false).instrument(span).await
    }

    /// Archive the record first; if that fails the worker keeps running
    /// under monitoring with its locks held
    async fn teardown(&self, employee: &str, completed: bool) -> Result<TaskRecord> {
        if self.retry.run("load task", || self.tracker.get(employee)).await?.is_none() {
            return Err(CoordinationError::not_found(EntityKind::Task, employee));
        }

        self.recovery.cancel(employee).await;
        let record = if completed {
            self.retry.run("complete task", || self.tracker.complete(employee)).await?
        } else {
            self.retry.run("cancel task", || self.tracker.cancel(employee)).await?
        };

        if let Some(handle) = self.monitor.deregister(employee).await {
            self.stop_worker(employee, &handle).await;
        }
        let released = self
            .retry
            .run("release locks", || self.registry.release(employee, None))
            .await?;

        info!(
            employee = %employee,
            status = %record.status,
            released = released.len(),
            "Task torn down"
        );
        Ok(record)
    }

    /// Cancel any active task, then fire the employee
    pub async fn dismiss(&self, employee: &str) -> Result<Dismissal> {
        if self.tracker.get(employee).await?.is_some() {
            self.cancel(employee).await?;
        }
        self.registry.fire(employee).await
    }

    /// Execute a parsed directive; unknown employees are hired on assignment
    pub async fn handle_directive(&self, directive: Directive) -> Result<DirectiveOutcome> {
        match directive {
            Directive::Assign {
                employee,
                description,
                files,
            } => {
                if let Err(CoordinationError::NotFound { .. }) = self.registry.get_employee(&employee).await {
                    self.registry.hire(&employee, "agent", 1).await?;
                }
                Ok(DirectiveOutcome::Assigned(self.assign(&employee, &description, &files).await?))
            }
            Directive::Complete { employee } => Ok(DirectiveOutcome::Completed(self.complete(&employee).await?)),
            Directive::Cancel { employee } => Ok(DirectiveOutcome::Cancelled(self.cancel(&employee).await?)),
            Directive::Help { employee, text } => Ok(DirectiveOutcome::HelpForwarded(
                self.request_help(&employee, &text).await?,
            )),
        }
    }

    async fn apply_progress_event(&self, event: ProgressEvent, drain: &mut EventDrain) {
        match event {
            ProgressEvent::SuggestRelease { employee, file_path } => {
                match self.registry.release_path(&employee, &file_path).await {
                    Ok(true) => {
                        info!(employee = %employee, file_path = %file_path, "Released finished file");
                        drain.released.push((employee, file_path));
                    }
                    Ok(false) => debug!(employee = %employee, file_path = %file_path, "Finished file was not held"),
                    Err(e) => warn!(employee = %employee, file_path = %file_path, error = %e, "Release failed"),
                }
            }
            ProgressEvent::StatusChanged { employee, from, to } => {
                debug!(employee = %employee, from = %from, to = %to, "Task status changed");
            }
        }
    }

    async fn apply_ownership_event(&self, event: OwnershipEvent, drain: &mut EventDrain) {
        if let OwnershipEvent::OwnerChanged { file_path, to, .. } = event {
            let mut ledger = self.ledger.lock().await;
            match to {
                Some(owner) => ledger.insert(file_path, owner),
                None => ledger.remove(&file_path),
            };
            drain.owner_changes += 1;
        }
    }

    /// Process every event published since the last drain
    pub async fn drain_events(&self) -> EventDrain {
        let mut drain = EventDrain::default();
        let mut streams = self.streams.lock().await;
        let Some(streams) = streams.as_mut() else {
            debug!("Events are consumed by the event pump");
            return drain;
        };

        loop {
            match streams.progress.try_recv() {
                Ok(event) => self.apply_progress_event(event, &mut drain).await,
                Err(TryRecvError::Lagged(missed)) => warn!(missed, "Progress events were dropped"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        loop {
            match streams.ownership.try_recv() {
                Ok(event) => self.apply_ownership_event(event, &mut drain).await,
                Err(TryRecvError::Lagged(missed)) => warn!(missed, "Ownership events were dropped"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        drain
    }

    /// Consume events in the background until shutdown
    pub fn spawn_event_pump(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let Some(mut streams) = bridge.streams.lock().await.take() else {
                warn!("Event pump already running");
                return;
            };
            loop {
                let mut drain = EventDrain::default();
                tokio::select! {
                    event = streams.progress.recv() => match event {
                        Ok(event) => bridge.apply_progress_event(event, &mut drain).await,
                        Err(RecvError::Lagged(missed)) => warn!(missed, "Progress events were dropped"),
                        Err(RecvError::Closed) => break,
                    },
                    event = streams.ownership.recv() => match event {
                        Ok(event) => bridge.apply_ownership_event(event, &mut drain).await,
                        Err(RecvError::Lagged(missed)) => warn!(missed, "Ownership events were dropped"),
                        Err(RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Event pump stopped");
        })
    }

    /// Current owner of every locked path as seen through ownership events
    pub async fn ledger(&self) -> BTreeMap<String, String> {
        self.ledger.lock().await.clone()
    }

    /// Forward chat mentions into a queue for `serve`
    pub fn subscribe_mentions(&self) -> mpsc::UnboundedReceiver<Mention> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channel.on_mention(Box::new(move |mention| {
            let _ = tx.send(mention);
        }));
        rx
    }

    /// Run directives from `inbox`, replying to each sender
    pub async fn serve(&self, mut inbox: mpsc::UnboundedReceiver<Mention>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let mention = tokio::select! {
                mention = inbox.recv() => match mention {
                    Some(mention) => mention,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let reply = match Directive::parse(&mention.text) {
                Ok(directive) => match self.handle_directive(directive).await {
                    Ok(outcome) => outcome.describe(),
                    Err(e) => format!("failed: {e}"),
                },
                Err(e) => format!("{e}"),
            };
            if let Err(e) = self.channel.send(&reply, Some(mention.from.clone())).await {
                warn!(from = %mention.from, error = %e, "Could not reply to directive");
            }
        }
    }

    pub async fn health_report(&self, anomaly_limit: usize) -> HealthReport {
        HealthReport {
            summary: self.monitor.summary().await,
            recent_anomalies: self.monitor.recent_anomalies(anomaly_limit).await,
            recovery_log: self.recovery.recovery_log().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::{LogNotificationChannel, MockNotificationChannel};
    use crate::progress::TaskStatus;
    use crate::store::{Inspection, MemoryStore, RetryConfig, Transaction};
    use crate::worker::{MockWorkerLauncher, WorkerStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store whose next `n` writes fail as if the database were busy
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn fail_next(&self, n: u32) {
            self.failures.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TransactionalStore for FlakyStore {
        async fn transact<'a>(&self, tx: Transaction<'a>) -> Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CoordinationError::Store("database is locked".to_string()));
            }
            self.inner.transact(tx).await
        }

        async fn inspect<'a>(&self, read: Inspection<'a>) -> Result<()> {
            self.inner.inspect(read).await
        }
    }

    fn worker_handle(employee: &str) -> WorkerHandle {
        WorkerHandle {
            id: format!("{employee}_1"),
            employee: employee.to_string(),
            pid: None,
            started_at: Utc::now(),
        }
    }

    fn launcher(start_fails: bool, stops: Arc<AtomicU32>) -> Arc<dyn WorkerLauncher> {
        let mut launcher = MockWorkerLauncher::new();
        launcher.expect_status().returning(|_| Ok(WorkerStatus::working()));
        launcher.expect_stop().returning(move |_| {
            stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        launcher.expect_start().returning(move |task| {
            if start_fails {
                return Err(CoordinationError::Worker("binary missing".to_string()));
            }
            Ok(worker_handle(&task.employee))
        });
        Arc::new(launcher)
    }

    async fn bridge_over(
        store: Arc<dyn TransactionalStore>,
        launcher: Arc<dyn WorkerLauncher>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Arc<CoordinationBridge> {
        let mut config = WardenConfig::default();
        config.store.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        };
        let runtime = CoordinationBridge::assemble(&config, store, launcher, channel, Arc::new(ManualClock::new()));
        let bridge = runtime.bridge;
        bridge.registry().hire("alice", "backend", 2).await.unwrap();
        bridge.registry().hire("bob", "frontend", 1).await.unwrap();
        bridge
    }

    async fn bridge(start_fails: bool) -> (Arc<CoordinationBridge>, Arc<AtomicU32>) {
        let stops = Arc::new(AtomicU32::new(0));
        let bridge = bridge_over(
            Arc::new(MemoryStore::new()),
            launcher(start_fails, stops.clone()),
            Arc::new(LogNotificationChannel::new()),
        )
        .await;
        (bridge, stops)
    }

    fn files(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_transient_store_failures_are_retried() {
        let store = Arc::new(FlakyStore::default());
        let stops = Arc::new(AtomicU32::new(0));
        let bridge = bridge_over(
            store.clone(),
            launcher(false, stops),
            Arc::new(LogNotificationChannel::new()),
        )
        .await;

        store.fail_next(2);
        let assignment = bridge.assign("alice", "refactor auth", &files(&["a.py"])).await.unwrap();
        assert_eq!(assignment.record.status, TaskStatus::Running);
        assert_eq!(bridge.registry().owner_of("a.py").await.unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_task_that_cannot_start_unwinds_worker_and_locks() {
        let store = Arc::new(FlakyStore::default());
        let stops = Arc::new(AtomicU32::new(0));

        let mut launcher = MockWorkerLauncher::new();
        let armed = store.clone();
        launcher.expect_start().returning(move |task| {
            // Every attempt to mark the task running fails
            armed.fail_next(3);
            Ok(worker_handle(&task.employee))
        });
        let counter = stops.clone();
        launcher.expect_stop().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let bridge = bridge_over(store.clone(), Arc::new(launcher), Arc::new(LogNotificationChannel::new())).await;

        let err = bridge.assign("alice", "refactor auth", &files(&["a.py"])).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Store(_)));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.registry().owner_of("a.py").await.unwrap(), None);
        assert!(bridge.tracker().get("alice").await.unwrap().is_none());
        assert!(!bridge.monitor().is_registered("alice").await);
    }

    #[tokio::test]
    async fn test_failed_completion_keeps_the_task_monitored() {
        let store = Arc::new(FlakyStore::default());
        let stops = Arc::new(AtomicU32::new(0));
        let bridge = bridge_over(
            store.clone(),
            launcher(false, stops.clone()),
            Arc::new(LogNotificationChannel::new()),
        )
        .await;
        bridge.assign("alice", "refactor auth", &files(&["a.py"])).await.unwrap();

        store.fail_next(3);
        assert!(matches!(bridge.complete("alice").await, Err(CoordinationError::Store(_))));
        assert!(bridge.monitor().is_registered("alice").await);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.registry().owner_of("a.py").await.unwrap().as_deref(), Some("alice"));

        let record = bridge.complete("alice").await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.registry().owner_of("a.py").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_help_is_logged_even_when_delivery_fails() {
        let mut channel = MockNotificationChannel::new();
        channel
            .expect_send()
            .returning(|_, _| Err(CoordinationError::Worker("chat is down".to_string())));
        let stops = Arc::new(AtomicU32::new(0));
        let bridge = bridge_over(Arc::new(MemoryStore::new()), launcher(false, stops), Arc::new(channel)).await;
        bridge.registry().fire("bob").await.unwrap();

        assert!(bridge.request_help("alice", "nobody else is here").await.is_err());
        let logged = bridge.monitor().recent_anomalies(10).await;
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].kind, crate::health::AnomalyKind::HelpRequested);
    }

    #[tokio::test]
    async fn test_assignment_locks_files_and_starts_monitoring() {
        let (bridge, _) = bridge(false).await;

        let assignment = bridge.assign("alice", "refactor auth", &files(&["src/b.py", "./src/a.py"])).await.unwrap();
        assert_eq!(assignment.record.file_paths(), files(&["src/a.py", "src/b.py"]));
        assert_eq!(assignment.locks.acquired.len(), 2);
        assert_eq!(assignment.handle.id, "alice_1");
        assert!(bridge.monitor().is_registered("alice").await);
        assert_eq!(bridge.registry().owner_of("src/a.py").await.unwrap().as_deref(), Some("alice"));

        let drain = bridge.drain_events().await;
        assert_eq!(drain.owner_changes, 2);
        assert_eq!(bridge.ledger().await.get("src/b.py").map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn test_conflicting_assignment_leaves_no_partial_state() {
        let (bridge, _) = bridge(false).await;
        bridge.assign("alice", "refactor auth", &files(&["a.py"])).await.unwrap();

        let err = bridge.assign("bob", "touch both", &files(&["a.py", "b.py"])).await.unwrap_err();
        assert_eq!(err.blocking_owners(), vec!["alice"]);
        assert_eq!(bridge.registry().owner_of("b.py").await.unwrap(), None);
        assert!(bridge.tracker().get("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_launch_unwinds_task_and_locks() {
        let (bridge, _) = bridge(true).await;

        let err = bridge.assign("alice", "refactor auth", &files(&["a.py"])).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Worker(_)));
        assert_eq!(bridge.registry().owner_of("a.py").await.unwrap(), None);
        assert!(bridge.tracker().get("alice").await.unwrap().is_none());
        assert!(!bridge.monitor().is_registered("alice").await);
    }

    #[tokio::test]
    async fn test_finished_file_is_released_when_events_drain() {
        let (bridge, _) = bridge(false).await;
        bridge.assign("alice", "refactor auth", &files(&["a.py", "b.py"])).await.unwrap();

        bridge.report_progress("alice", "a.py", 100.0, "done").await.unwrap();
        let drain = bridge.drain_events().await;

        assert_eq!(drain.released, vec![("alice".to_string(), "a.py".to_string())]);
        assert_eq!(bridge.registry().owner_of("a.py").await.unwrap(), None);
        assert_eq!(bridge.registry().owner_of("b.py").await.unwrap().as_deref(), Some("alice"));
        assert!(!bridge.ledger().await.contains_key("a.py"));
    }

    #[tokio::test]
    async fn test_completion_stops_worker_and_releases_everything() {
        let (bridge, stops) = bridge(false).await;
        bridge.assign("alice", "refactor auth", &files(&["a.py", "b.py"])).await.unwrap();

        let record = bridge.complete("alice").await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(bridge.registry().locks_held_by("alice").await.unwrap().is_empty());
        assert!(!bridge.monitor().is_registered("alice").await);

        assert!(matches!(
            bridge.complete("alice").await,
            Err(CoordinationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_directives_drive_the_lifecycle() {
        let (bridge, _) = bridge(false).await;

        let outcome = bridge
            .handle_directive(Directive::parse("assign task to carol: docs pass, files=[README.md]").unwrap())
            .await
            .unwrap();
        assert!(matches!(outcome, DirectiveOutcome::Assigned(_)));
        assert_eq!(bridge.registry().get_employee("carol").await.unwrap().role, "agent");

        let outcome = bridge
            .handle_directive(Directive::parse("help from carol: where is the style guide?").unwrap())
            .await
            .unwrap();
        assert!(matches!(outcome, DirectiveOutcome::HelpForwarded(Some(_))));

        let outcome = bridge
            .handle_directive(Directive::parse("cancel task for carol").unwrap())
            .await
            .unwrap();
        assert!(matches!(outcome, DirectiveOutcome::Cancelled(_)));
        assert_eq!(bridge.registry().owner_of("README.md").await.unwrap(), None);

        let report = bridge.health_report(10).await;
        assert_eq!(report.recent_anomalies.len(), 1);
        assert_eq!(report.summary.total, 0);
    }

    #[tokio::test]
    async fn test_dismissal_cancels_the_active_task() {
        let (bridge, _) = bridge(false).await;
        bridge.assign("alice", "refactor auth", &files(&["a.py"])).await.unwrap();

        bridge.dismiss("alice").await.unwrap();
        assert!(bridge.registry().get_employee("alice").await.is_err());
        assert_eq!(bridge.registry().owner_of("a.py").await.unwrap(), None);
        assert_eq!(bridge.tracker().history("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_help_from_unknown_employee_is_rejected() {
        let (bridge, _) = bridge(false).await;
        assert!(matches!(
            bridge.request_help("mallory", "let me in").await,
            Err(CoordinationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_event_pump_takes_over_draining() {
        let (bridge, _) = bridge(false).await;
        let (trigger, shutdown) = watch::channel(false);
        let pump = bridge.spawn_event_pump(shutdown);

        bridge.assign("alice", "refactor auth", &files(&["a.py"])).await.unwrap();
        bridge.report_progress("alice", "a.py", 100.0, "done").await.unwrap();

        for _ in 0..50 {
            if bridge.registry().owner_of("a.py").await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(bridge.registry().owner_of("a.py").await.unwrap(), None);
        assert_eq!(bridge.drain_events().await, EventDrain::default());

        trigger.send_replace(true);
        pump.await.unwrap();
    }
}
