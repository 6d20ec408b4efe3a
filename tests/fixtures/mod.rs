// Shared fakes for integration tests: a scripted worker launcher and a
// notification channel that records everything sent through it.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use crew_warden::clock::ManualClock;
use crew_warden::config::WardenConfig;
use crew_warden::errors::{CoordinationError, Result};
use crew_warden::notify::{Mention, MentionCallback, NotificationChannel};
use crew_warden::store::MemoryStore;
use crew_warden::worker::{WorkerHandle, WorkerLauncher, WorkerStatus, WorkerTask};
use crew_warden::{CoordinationBridge, WardenRuntime};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Launcher whose worker statuses are set by the test
#[derive(Default)]
pub struct ScriptedLauncher {
    statuses: Mutex<HashMap<String, WorkerStatus>>,
    started: Mutex<Vec<WorkerTask>>,
    stopped: Mutex<Vec<String>>,
    fail_starts: Mutex<bool>,
}

impl ScriptedLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Status reported for every worker of `employee` from now on
    pub fn script(&self, employee: &str, status: WorkerStatus) {
        self.statuses.lock().unwrap().insert(employee.to_string(), status);
    }

    pub fn fail_starts(&self, fail: bool) {
        *self.fail_starts.lock().unwrap() = fail;
    }

    pub fn started(&self) -> Vec<WorkerTask> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn start(&self, task: &WorkerTask) -> Result<WorkerHandle> {
        if *self.fail_starts.lock().unwrap() {
            return Err(CoordinationError::Worker("worker binary not found".to_string()));
        }
        let mut started = self.started.lock().unwrap();
        started.push(task.clone());
        Ok(WorkerHandle {
            id: format!("{}_{}", task.employee, started.len()),
            employee: task.employee.clone(),
            pid: None,
            started_at: Utc::now(),
        })
    }

    async fn status(&self, handle: &WorkerHandle) -> Result<WorkerStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&handle.employee)
            .cloned()
            .unwrap_or_else(WorkerStatus::working))
    }

    async fn stop(&self, handle: &WorkerHandle) -> Result<()> {
        self.stopped.lock().unwrap().push(handle.id.clone());
        Ok(())
    }
}

/// Channel that keeps every outbound message
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, Option<String>)>>,
    callbacks: Mutex<Vec<MentionCallback>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(String, Option<String>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(_, to)| to.as_deref() == Some(target))
            .map(|(text, _)| text)
            .collect()
    }

    pub fn mention(&self, from: &str, text: &str) {
        for callback in self.callbacks.lock().unwrap().iter() {
            callback(Mention {
                from: from.to_string(),
                text: text.to_string(),
            });
        }
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, text: &str, target: Option<String>) -> Result<()> {
        self.sent.lock().unwrap().push((text.to_string(), target));
        Ok(())
    }

    fn on_mention(&self, callback: MentionCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }
}

pub struct Harness {
    pub runtime: WardenRuntime,
    pub launcher: Arc<ScriptedLauncher>,
    pub channel: Arc<RecordingChannel>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn bridge(&self) -> &Arc<CoordinationBridge> {
        &self.runtime.bridge
    }

    /// One monitor cycle with every resulting signal handed to recovery
    pub async fn cycle(&mut self) {
        self.runtime.bridge.monitor().poll_once().await;
        while let Ok(signal) = self.runtime.signals.try_recv() {
            self.runtime.bridge.recovery().handle_signal(signal).await;
        }
        self.runtime.bridge.recovery().settle().await;
    }
}

pub async fn harness(config: WardenConfig, employees: &[&str]) -> Harness {
    let launcher = ScriptedLauncher::new();
    let channel = RecordingChannel::new();
    let clock = ManualClock::new();
    let runtime = CoordinationBridge::assemble(
        &config,
        Arc::new(MemoryStore::new()),
        launcher.clone(),
        channel.clone(),
        Arc::new(clock.clone()),
    );
    for employee in employees {
        runtime.bridge.registry().hire(employee, "engineer", 2).await.unwrap();
    }
    Harness {
        runtime,
        launcher,
        channel,
        clock,
    }
}

pub fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|p| p.to_string()).collect()
}
