//! Process-backed workers
//!
//! Each worker is a child process running the configured command with the
//! task description and working files on its command line. A worker may
//! print `PROGRESS <percent>` lines on stdout; the latest value becomes the
//! status progress hint.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{WorkerHandle, WorkerLauncher, WorkerStatus, WorkerTask};
use crate::errors::{CoordinationError, EntityKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessWorkerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Grace period between kill and reap on stop
    pub stop_timeout_secs: u64,
}

impl Default for ProcessWorkerConfig {
    fn default() -> Self {
        Self {
            command: "crew-worker".to_string(),
            args: Vec::new(),
            stop_timeout_secs: 5,
        }
    }
}

type Hints = Arc<std::sync::Mutex<HashMap<String, f64>>>;

pub struct ProcessWorkerLauncher {
    config: ProcessWorkerConfig,
    children: Mutex<HashMap<String, Child>>,
    hints: Hints,
    sequence: AtomicU64,
}

impl ProcessWorkerLauncher {
    pub fn new(config: ProcessWorkerConfig) -> Self {
        Self {
            config,
            children: Mutex::new(HashMap::new()),
            hints: Arc::new(std::sync::Mutex::new(HashMap::new())),
            sequence: AtomicU64::new(0),
        }
    }

    fn build_command(&self, task: &WorkerTask) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg("--employee")
            .arg(&task.employee)
            .arg("--task")
            .arg(&task.description);
        for file in &task.files {
            command.arg("--file").arg(file);
        }
        command
            .env("CREW_WARDEN_EMPLOYEE", &task.employee)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn hint_for(&self, id: &str) -> Option<f64> {
        self.hints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .copied()
    }

    pub async fn running_count(&self) -> usize {
        self.children.lock().await.len()
    }
}

fn parse_progress_line(line: &str) -> Option<f64> {
    let value = line.trim().strip_prefix("PROGRESS")?.trim();
    let percent: f64 = value.trim_end_matches('%').parse().ok()?;
    (percent.is_finite() && (0.0..=100.0).contains(&percent)).then_some(percent)
}

fn reap_error(id: &str, err: std::io::Error) -> CoordinationError {
    CoordinationError::Worker(format!("failed to query worker {id}: {err}"))
}

fn watch_progress(id: String, stdout: ChildStdout, hints: Hints) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(percent) = parse_progress_line(&line) {
                        hints
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .insert(id.clone(), percent);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(worker_id = %id, error = %e, "Stopped reading worker output");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn start(&self, task: &WorkerTask) -> Result<WorkerHandle> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}_{sequence}", task.employee);

        let mut child = self.build_command(task).spawn().map_err(|e| {
            error!(
                employee = %task.employee,
                command = %self.config.command,
                error = %e,
                "Failed to spawn worker process"
            );
            CoordinationError::Worker(format!("failed to spawn {}: {e}", self.config.command))
        })?;

        if let Some(stdout) = child.stdout.take() {
            watch_progress(id.clone(), stdout, self.hints.clone());
        }

        let pid = child.id();
        self.children.lock().await.insert(id.clone(), child);

        info!(
            employee = %task.employee,
            worker_id = %id,
            system_pid = ?pid,
            files = task.files.len(),
            "Worker process spawned"
        );

        Ok(WorkerHandle {
            id,
            employee: task.employee.clone(),
            pid,
            started_at: Utc::now(),
        })
    }

    async fn status(&self, handle: &WorkerHandle) -> Result<WorkerStatus> {
        let mut children = self.children.lock().await;
        let child = children
            .get_mut(&handle.id)
            .ok_or_else(|| CoordinationError::not_found(EntityKind::Worker, &handle.id))?;

        let status = match child.try_wait().map_err(|e| reap_error(&handle.id, e))? {
            None => WorkerStatus {
                progress_hint: self.hint_for(&handle.id),
                ..WorkerStatus::working()
            },
            Some(exit) if exit.success() => WorkerStatus {
                progress_hint: self.hint_for(&handle.id),
                ..WorkerStatus::idle()
            },
            Some(exit) => WorkerStatus::error(match exit.code() {
                Some(code) => format!("worker exited with code {code}"),
                None => "worker terminated by signal".to_string(),
            }),
        };
        Ok(status)
    }

    async fn stop(&self, handle: &WorkerHandle) -> Result<()> {
        let child = self.children.lock().await.remove(&handle.id);
        self.hints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle.id);

        let Some(mut child) = child else {
            debug!(worker_id = %handle.id, "Worker already stopped");
            return Ok(());
        };

        if child.try_wait().map_err(|e| reap_error(&handle.id, e))?.is_some() {
            return Ok(());
        }
        if let Err(e) = child.start_kill() {
            warn!(worker_id = %handle.id, error = %e, "Failed to signal worker process");
        }
        let grace = Duration::from_secs(self.config.stop_timeout_secs);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(exit)) => {
                info!(worker_id = %handle.id, exit = %exit, "Worker process stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(reap_error(&handle.id, e)),
            Err(_) => {
                warn!(worker_id = %handle.id, "Worker did not exit within grace period");
                Ok(())
            }
        }
    }
}
